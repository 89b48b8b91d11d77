//! # Concurrency Coordination
//!
//! Owns the bounded worker pool for a batch run and composes the rate
//! limiter and resource monitor into a single "acquire a slot" entry point.
//! A background monitor task re-evaluates effective concurrency on a fixed
//! interval; adjustments change the number of available permits and never
//! kill in-flight work.
//!
//! ## Key Components
//!
//! - [`ConcurrencyController`] - Factory for per-batch contexts
//! - [`BatchContext`] - Scoped pool + rate limiter + monitor for one run
//! - [`ProcessingSlot`] - RAII permit, released exactly once on all paths
//! - [`scaling`] - Scaling policy evaluation
//! - [`monitor`] - Resource sampling and the rolling performance window

pub mod monitor;
pub mod scaling;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{JobSpec, ScalingConfig};
use crate::error::{BatchCoreError, Result};
use crate::rate_limiter::AdaptiveRateLimiter;

use self::monitor::{PerformanceWindow, ResourceSampler, SystemResourceMonitor, WindowStats};
use self::scaling::ScalingEngine;

/// Point-in-time health view of a running batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchHealth {
    pub effective_concurrency: usize,
    pub configured_max: usize,
    pub window: WindowStats,
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// Factory for batch contexts; owns the scaling policy and resource sampler
pub struct ConcurrencyController {
    scaling_config: ScalingConfig,
    resources: Arc<dyn ResourceSampler>,
}

impl ConcurrencyController {
    pub fn new(scaling_config: ScalingConfig) -> Self {
        Self {
            scaling_config,
            resources: Arc::new(SystemResourceMonitor::new()),
        }
    }

    /// Inject a resource sampler (tests, alternate platforms)
    pub fn with_sampler(scaling_config: ScalingConfig, sampler: Arc<dyn ResourceSampler>) -> Self {
        Self {
            scaling_config,
            resources: sampler,
        }
    }

    /// Create the scoped concurrency context for one batch run
    pub fn create_batch_context(&self, spec: &JobSpec) -> BatchContext {
        let ceiling = spec.max_concurrency.min(self.scaling_config.hard_ceiling).max(1);
        let semaphore = Arc::new(Semaphore::new(ceiling));
        let effective = Arc::new(AtomicUsize::new(ceiling));
        let window = Arc::new(PerformanceWindow::new(
            self.scaling_config.performance_window,
        ));
        let rate_limiter = Arc::new(AdaptiveRateLimiter::new(
            spec.rate_limits.clone(),
            Default::default(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor_handle = spawn_monitor_loop(
            self.scaling_config.clone(),
            self.resources.clone(),
            semaphore.clone(),
            effective.clone(),
            window.clone(),
            ceiling,
            shutdown_rx,
        );

        info!(
            max_concurrency = ceiling,
            evaluation_interval_secs = self.scaling_config.evaluation_interval.as_secs(),
            "🏗️ COORDINATOR: Batch context created"
        );

        BatchContext {
            semaphore,
            effective,
            ceiling,
            rate_limiter,
            window,
            resources: self.resources.clone(),
            shutdown_tx,
            monitor_handle: Some(monitor_handle),
        }
    }
}

/// Scoped concurrency resources for one batch run. Shut down on drop; all
/// exit paths (including panics unwinding through the owner) release the
/// pool and stop the monitor task.
pub struct BatchContext {
    semaphore: Arc<Semaphore>,
    effective: Arc<AtomicUsize>,
    ceiling: usize,
    rate_limiter: Arc<AdaptiveRateLimiter>,
    window: Arc<PerformanceWindow>,
    resources: Arc<dyn ResourceSampler>,
    shutdown_tx: watch::Sender<bool>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl BatchContext {
    /// Suspend until both a pool permit and rate-limit permission are
    /// available, then hand out the slot
    pub async fn acquire_processing_slot(&self, operation: &str) -> Result<ProcessingSlot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| {
                BatchCoreError::InvalidTransition(
                    "batch context is shut down; no further slots".to_string(),
                )
            })?;
        self.rate_limiter.acquire(operation).await;

        Ok(ProcessingSlot {
            _permit: permit,
            window: self.window.clone(),
            rate_limiter: self.rate_limiter.clone(),
            operation: operation.to_string(),
            started: tokio::time::Instant::now(),
        })
    }

    /// Current effective concurrency (permits the pool will hand out)
    pub fn effective_concurrency(&self) -> usize {
        self.effective.load(Ordering::Acquire)
    }

    /// Health snapshot for reporting
    pub fn health(&self) -> BatchHealth {
        BatchHealth {
            effective_concurrency: self.effective_concurrency(),
            configured_max: self.ceiling,
            window: self.window.stats(),
            cpu_usage: self.resources.cpu_usage(),
            memory_usage: self.resources.memory_usage(),
        }
    }

    /// Rate limiter shared with the slots (diagnostics, direct error feeds)
    pub fn rate_limiter(&self) -> Arc<AdaptiveRateLimiter> {
        self.rate_limiter.clone()
    }

    /// Stop the monitor task and wake any waiters with an error. Idempotent.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.semaphore.close();
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.await;
        }
        debug!("COORDINATOR: Batch context shut down");
    }
}

impl Drop for BatchContext {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.semaphore.close();
        if let Some(handle) = self.monitor_handle.take() {
            handle.abort();
        }
    }
}

/// One unit of permission to run work. Holds the pool permit for exactly as
/// long as the item dispatch lasts; dropping the slot releases it on every
/// path, success or failure.
pub struct ProcessingSlot {
    _permit: OwnedSemaphorePermit,
    window: Arc<PerformanceWindow>,
    rate_limiter: Arc<AdaptiveRateLimiter>,
    operation: String,
    started: tokio::time::Instant,
}

impl ProcessingSlot {
    /// Record a successful dispatch and release the slot
    pub fn record_success(self) {
        self.window.record(self.started.elapsed(), true);
    }

    /// Record a failed dispatch, feed the rate limiter's error window, and
    /// release the slot
    pub async fn record_failure(self) {
        self.window.record(self.started.elapsed(), false);
        self.rate_limiter.record_error(&self.operation).await;
    }

    /// Elapsed wall-clock time since the slot was acquired
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_monitor_loop(
    config: ScalingConfig,
    resources: Arc<dyn ResourceSampler>,
    semaphore: Arc<Semaphore>,
    effective: Arc<AtomicUsize>,
    window: Arc<PerformanceWindow>,
    ceiling: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut engine = ScalingEngine::new(config.clone());
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(config.evaluation_interval) => {}
            }
            if *shutdown_rx.borrow() {
                break;
            }

            let cpu = resources.cpu_usage();
            let memory = resources.memory_usage();
            let stats = window.stats();
            let current = effective.load(Ordering::Acquire);
            let decision = engine.evaluate(cpu, memory, &stats);
            let target = engine.apply(decision, current, ceiling);

            if target == current {
                continue;
            }
            apply_concurrency_target(&semaphore, &effective, current, target);
        }
        debug!("COORDINATOR: Monitor loop exited");
    })
}

/// Adjust available permits toward the target without interrupting in-flight
/// work. Growth is immediate; shrinking reclaims permits as they free up.
fn apply_concurrency_target(
    semaphore: &Arc<Semaphore>,
    effective: &Arc<AtomicUsize>,
    current: usize,
    target: usize,
) {
    effective.store(target, Ordering::Release);
    if target > current {
        semaphore.add_permits(target - current);
        info!(
            from = current,
            to = target,
            "🎛️ COORDINATOR: Concurrency increased"
        );
    } else {
        let reclaim = (current - target) as u32;
        let semaphore = semaphore.clone();
        tokio::spawn(async move {
            match semaphore.acquire_many_owned(reclaim).await {
                Ok(permits) => permits.forget(),
                Err(_) => {
                    // Context shut down while reclaiming; nothing to do
                }
            }
        });
        warn!(
            from = current,
            to = target,
            "🎛️ COORDINATOR: Concurrency reduced (permits reclaimed as they free)"
        );
    }
}
