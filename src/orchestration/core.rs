//! # Batch Orchestrator
//!
//! The dispatch loop that drives one batch run end to end: claims pending
//! items in submission order, runs them on the bounded adaptive pool, routes
//! every failure through the classifier and circuit breaker, and keeps the
//! checkpoint current so a crash at any point is resumable.
//!
//! ## Key Components
//!
//! - [`BatchOrchestrator`] - Composition root for one process's batch runs
//! - Dispatch loop - Claims items and spawns workers onto a [`JoinSet`]
//! - Worker - One item's attempt chain, including in-slot delayed retries
//!
//! A paused or cancelled job settles its in-flight items before the status
//! change becomes final; work is never aborted mid-attempt.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{JobSpec, ProgressConfig, ScalingConfig};
use crate::error::{BatchCoreError, Result};
use crate::logging::log_item_operation;
use crate::models::{BatchJob, JobStatus, WorkItem, WorkItemStatus};
use crate::rate_limiter::AdaptiveRateLimiter;
use crate::resilience::{CircuitBreakerConfig, JobCircuitBreaker};

use super::coordinator::{ConcurrencyController, ProcessingSlot};
use super::event_publisher::ProgressEventPublisher;
use super::failure_classifier::{FailureClassifier, KeywordClassifier};
use super::job_manager::JobManager;
use super::progress_tracker::ProgressTracker;
use super::types::{
    BatchSummary, FailureCategory, ProgressEvent, RecoveryAction, WorkError, WorkHandler,
    WorkOutput,
};

/// Composition root for batch runs. One orchestrator serves many jobs; all
/// per-job state lives in the components it composes.
pub struct BatchOrchestrator {
    manager: Arc<JobManager>,
    controller: ConcurrencyController,
    classifier: Arc<dyn FailureClassifier>,
    breaker: Arc<JobCircuitBreaker>,
    tracker: Arc<ProgressTracker>,
    events: ProgressEventPublisher,
}

impl BatchOrchestrator {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self::with_configs(
            manager,
            ScalingConfig::default(),
            CircuitBreakerConfig::default(),
            ProgressConfig::default(),
        )
    }

    pub fn with_configs(
        manager: Arc<JobManager>,
        scaling: ScalingConfig,
        breaker: CircuitBreakerConfig,
        progress: ProgressConfig,
    ) -> Self {
        Self {
            manager,
            controller: ConcurrencyController::new(scaling),
            classifier: Arc::new(KeywordClassifier::new()),
            breaker: Arc::new(JobCircuitBreaker::new(breaker)),
            tracker: Arc::new(ProgressTracker::new(progress)),
            events: ProgressEventPublisher::new(),
        }
    }

    /// Swap in a non-default classification strategy
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Swap in a non-default concurrency controller (tests, alternate samplers)
    pub fn with_controller(mut self, controller: ConcurrencyController) -> Self {
        self.controller = controller;
        self
    }

    /// Subscribe to the push-based progress event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &ProgressEventPublisher {
        &self.events
    }

    /// Drive one job to a settled state: completed, failed, paused, or
    /// cancelled. Accepts a pending job (started here) or a job already
    /// running after [`JobManager::resume`].
    ///
    /// Returns the run's accounting on completion, pause, or cancellation;
    /// a job that reaches its terminal failed state returns
    /// [`BatchCoreError::JobFailed`].
    pub async fn run_job(
        &self,
        job_id: Uuid,
        handler: Arc<dyn WorkHandler>,
    ) -> Result<BatchSummary> {
        let job = self.manager.job(job_id)?;
        let run_started = tokio::time::Instant::now();

        let (spec, total, progress_state, status) = {
            let guard = job.lock().await;
            (
                guard.spec.clone(),
                guard.progress.total,
                guard.progress.clone(),
                guard.status,
            )
        };
        match status {
            JobStatus::Pending => self.manager.start(job_id).await?,
            JobStatus::Running => {}
            other => {
                return Err(BatchCoreError::InvalidTransition(format!(
                    "job {job_id} cannot run from {other}; resume it first"
                )))
            }
        }

        self.tracker
            .restore_job(job_id, progress_state, spec.checkpoint_interval);
        self.events.publish(ProgressEvent::JobStarted {
            job_id,
            total_items: total,
            started_at: Utc::now(),
        });
        info!(
            job_id = %job_id,
            total_items = total,
            max_concurrency = spec.max_concurrency,
            "🚀 ORCHESTRATOR: Job run starting"
        );

        let mut cancel_rx = self.manager.begin_run(job_id);
        let mut ctx = self.controller.create_batch_context(&spec);

        let shared = Arc::new(WorkerShared {
            job_id,
            job: job.clone(),
            spec,
            handler,
            classifier: self.classifier.clone(),
            breaker: self.breaker.clone(),
            tracker: self.tracker.clone(),
            events: self.events.clone(),
            manager: self.manager.clone(),
            rate_limiter: ctx.rate_limiter(),
            breakdown: parking_lot::Mutex::new(HashMap::new()),
            pause_reason: parking_lot::Mutex::new(None),
        });
        let operation = shared.handler.operation_name().to_string();

        let mut workers: JoinSet<()> = JoinSet::new();
        loop {
            // Reap finished workers without blocking
            while workers.try_join_next().is_some() {}

            if *cancel_rx.borrow() {
                break;
            }
            if job.lock().await.status != JobStatus::Running {
                break;
            }

            let slot = tokio::select! {
                _ = cancel_rx.changed() => break,
                acquired = ctx.acquire_processing_slot(&operation) => match acquired {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };

            // The slot wait can be long; re-check status before claiming
            let claimed = {
                let mut guard = job.lock().await;
                if guard.status != JobStatus::Running {
                    drop(slot);
                    break;
                }
                guard.claim_next_pending()
            };

            match claimed {
                Some(item) => {
                    let shared = shared.clone();
                    let cancel = cancel_rx.clone();
                    workers.spawn(async move {
                        process_item(shared, slot, item, cancel).await;
                    });
                }
                None => {
                    drop(slot);
                    if workers.is_empty() {
                        break;
                    }
                    // An in-flight worker may settle or the run may get
                    // cancelled; wait for the next worker to finish
                    let _ = workers.join_next().await;
                }
            }
        }

        // Settle all in-flight items before any terminal transition
        while workers.join_next().await.is_some() {}

        let cancelled = *cancel_rx.borrow();
        let outcome = self
            .finalize(job_id, &job, &shared, cancelled, run_started)
            .await;
        ctx.shutdown().await;
        self.manager.finish_run(job_id);
        outcome
    }

    async fn finalize(
        &self,
        job_id: Uuid,
        job: &Arc<Mutex<BatchJob>>,
        shared: &Arc<WorkerShared>,
        cancelled: bool,
        run_started: tokio::time::Instant,
    ) -> Result<BatchSummary> {
        let tracked = self.tracker.export_state(job_id).ok();

        let (status, summary) = {
            let mut guard = job.lock().await;
            if let Some(state) = tracked {
                guard.progress.history = state.history;
                guard.progress.total_cost_accumulated = state.total_cost_accumulated;
            }

            if cancelled && !guard.status.is_terminal() {
                guard.transition_to(JobStatus::Cancelled)?;
            } else if guard.status == JobStatus::Running {
                if guard.all_items_settled() {
                    guard.transition_to(JobStatus::Completed)?;
                } else {
                    guard.transition_to(JobStatus::Failed)?;
                }
            }

            let counts = guard.item_counts();
            let summary = BatchSummary {
                job_id,
                completed: counts.succeeded,
                failed: counts.failed,
                skipped: counts.skipped,
                total: guard.progress.total,
                total_cost: guard.progress.total_cost_accumulated,
                failure_breakdown: shared.breakdown.lock().clone(),
                elapsed: run_started.elapsed(),
            };
            if guard.status == JobStatus::Failed && guard.error_summary.is_none() {
                guard.error_summary = Some(summary.describe_failures());
            }
            (guard.status, summary)
        };

        self.manager.save_checkpoint(job_id).await?;

        match status {
            JobStatus::Completed => {
                info!(
                    job_id = %job_id,
                    completed = summary.completed,
                    skipped = summary.skipped,
                    total_cost = summary.total_cost,
                    "✅ ORCHESTRATOR: Job completed"
                );
                self.events.publish(ProgressEvent::JobCompleted {
                    job_id,
                    summary: summary.clone(),
                });
            }
            JobStatus::Failed => {
                self.events.publish(ProgressEvent::JobFailed {
                    job_id,
                    error_summary: summary.describe_failures(),
                });
            }
            JobStatus::Cancelled => {
                info!(job_id = %job_id, "🛑 ORCHESTRATOR: Job cancelled");
                self.events.publish(ProgressEvent::JobCancelled { job_id });
            }
            JobStatus::Paused => {
                let reason = shared
                    .pause_reason
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "paused".to_string());
                self.events.publish(ProgressEvent::JobPaused { job_id, reason });
            }
            _ => {}
        }

        self.tracker.forget(job_id);
        if status.is_terminal() {
            self.breaker.forget(job_id);
        }

        if status == JobStatus::Failed {
            return Err(BatchCoreError::JobFailed {
                job_id,
                summary: summary.describe_failures(),
            });
        }
        Ok(summary)
    }
}

/// Everything a worker needs, shared across the run
struct WorkerShared {
    job_id: Uuid,
    job: Arc<Mutex<BatchJob>>,
    spec: JobSpec,
    handler: Arc<dyn WorkHandler>,
    classifier: Arc<dyn FailureClassifier>,
    breaker: Arc<JobCircuitBreaker>,
    tracker: Arc<ProgressTracker>,
    events: ProgressEventPublisher,
    manager: Arc<JobManager>,
    rate_limiter: Arc<AdaptiveRateLimiter>,
    breakdown: parking_lot::Mutex<HashMap<FailureCategory, u32>>,
    pause_reason: parking_lot::Mutex<Option<String>>,
}

/// One item's attempt chain. Holds the processing slot for its full
/// duration, including classifier-suggested retry delays, so a retrying
/// item keeps occupying exactly one unit of concurrency.
async fn process_item(
    shared: Arc<WorkerShared>,
    slot: ProcessingSlot,
    item: WorkItem,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let operation = shared.handler.operation_name().to_string();
    let mut attempt = item.attempt_count;

    loop {
        let dispatched = tokio::time::timeout(
            shared.spec.timeout_per_item,
            shared.handler.execute(&item.payload, cancel_rx.clone()),
        )
        .await;

        let error = match dispatched {
            Ok(Ok(output)) => {
                finish_success(&shared, &item, output, slot).await;
                return;
            }
            Ok(Err(work_error)) => work_error,
            Err(_) => WorkError::new(format!(
                "item timed out after {}s",
                shared.spec.timeout_per_item.as_secs()
            )),
        };

        let classification = shared.classifier.classify(&error, attempt);
        *shared
            .breakdown
            .lock()
            .entry(classification.category)
            .or_insert(0) += 1;
        log_item_operation(
            "attempt_failed",
            shared.job_id,
            &item.id,
            attempt,
            &classification.category.to_string(),
            Some(&error.message),
        );

        if shared.breaker.should_trip(shared.job_id, &classification) {
            pause_job(
                &shared,
                format!("circuit breaker open ({})", classification.category),
            )
            .await;
            requeue_for_resume(&shared, &item, &error).await;
            slot.record_failure().await;
            return;
        }

        match classification.recovery_action {
            RecoveryAction::RetryNow | RecoveryAction::RetryAfterDelay => {
                let ceiling = classification
                    .max_retries
                    .min(shared.spec.max_retries_per_item);
                if !classification.is_retryable || attempt > ceiling {
                    finish_failed(&shared, &item, &error, slot).await;
                    return;
                }

                shared.rate_limiter.record_error(&operation).await;
                if !classification.suggested_delay.is_zero() {
                    tokio::select! {
                        _ = cancel_rx.changed() => {}
                        _ = tokio::time::sleep(classification.suggested_delay) => {}
                    }
                }
                if *cancel_rx.borrow() {
                    requeue_for_resume(&shared, &item, &error).await;
                    drop(slot);
                    return;
                }

                {
                    let mut guard = shared.job.lock().await;
                    if let Some(stored) = guard.items.iter_mut().find(|i| i.id == item.id) {
                        stored.attempt_count += 1;
                        stored.last_error = Some(error.message.clone());
                    }
                }
                attempt += 1;
                shared.rate_limiter.acquire(&operation).await;
            }
            RecoveryAction::SkipItem => {
                finish_skipped(&shared, &item, &error, slot).await;
                return;
            }
            RecoveryAction::PauseJob => {
                pause_job(
                    &shared,
                    format!("{}: {}", classification.category, error.message),
                )
                .await;
                requeue_for_resume(&shared, &item, &error).await;
                slot.record_failure().await;
                return;
            }
            RecoveryAction::FailBatch => {
                finish_failed(&shared, &item, &error, slot).await;
                fail_job(&shared, error.message.clone()).await;
                return;
            }
        }
    }
}

async fn finish_success(
    shared: &Arc<WorkerShared>,
    item: &WorkItem,
    output: WorkOutput,
    slot: ProcessingSlot,
) {
    let elapsed = slot.elapsed();
    let counts = {
        let mut guard = shared.job.lock().await;
        if let Some(stored) = guard.items.iter_mut().find(|i| i.id == item.id) {
            stored.result = Some(output.result.clone());
            stored.last_error = None;
        }
        if let Err(err) = guard.transition_item(&item.id, WorkItemStatus::Succeeded) {
            error!(job_id = %shared.job_id, item_id = %item.id, error = %err, "ORCHESTRATOR: Item transition failed");
        }
        (
            guard.progress.completed,
            guard.progress.failed,
            guard.progress.skipped,
        )
    };
    shared.breaker.record_success(shared.job_id);
    slot.record_success();
    publish_progress(shared, &item.id, elapsed, output.cost, counts).await;
}

async fn finish_failed(
    shared: &Arc<WorkerShared>,
    item: &WorkItem,
    error: &WorkError,
    slot: ProcessingSlot,
) {
    let elapsed = slot.elapsed();
    let counts = {
        let mut guard = shared.job.lock().await;
        if let Some(stored) = guard.items.iter_mut().find(|i| i.id == item.id) {
            stored.last_error = Some(error.message.clone());
        }
        if let Err(err) = guard.transition_item(&item.id, WorkItemStatus::Failed) {
            error!(job_id = %shared.job_id, item_id = %item.id, error = %err, "ORCHESTRATOR: Item transition failed");
        }
        (
            guard.progress.completed,
            guard.progress.failed,
            guard.progress.skipped,
        )
    };
    slot.record_failure().await;
    publish_progress(shared, &item.id, elapsed, 0.0, counts).await;
}

async fn finish_skipped(
    shared: &Arc<WorkerShared>,
    item: &WorkItem,
    error: &WorkError,
    slot: ProcessingSlot,
) {
    let elapsed = slot.elapsed();
    let counts = {
        let mut guard = shared.job.lock().await;
        if let Some(stored) = guard.items.iter_mut().find(|i| i.id == item.id) {
            stored.last_error = Some(error.message.clone());
        }
        if let Err(err) = guard.transition_item(&item.id, WorkItemStatus::Skipped) {
            error!(job_id = %shared.job_id, item_id = %item.id, error = %err, "ORCHESTRATOR: Item transition failed");
        }
        (
            guard.progress.completed,
            guard.progress.failed,
            guard.progress.skipped,
        )
    };
    warn!(
        job_id = %shared.job_id,
        item_id = %item.id,
        error = %error.message,
        "⏭️ ORCHESTRATOR: Item skipped as permanently invalid"
    );
    slot.record_failure().await;
    publish_progress(shared, &item.id, elapsed, 0.0, counts).await;
}

/// Settle an item back to pending when its attempt failed but the item
/// itself is still eligible: cancellation mid-retry, or a pause caused by a
/// systemic condition (expired credentials, open circuit) rather than by
/// the item. The failed/pending transition pair keeps the tallies honest.
async fn requeue_for_resume(shared: &Arc<WorkerShared>, item: &WorkItem, error: &WorkError) {
    let mut guard = shared.job.lock().await;
    if let Some(stored) = guard.items.iter_mut().find(|i| i.id == item.id) {
        stored.last_error = Some(error.message.clone());
    }
    let failed = guard.transition_item(&item.id, WorkItemStatus::Failed);
    let requeued = failed
        .and_then(|_| guard.transition_item(&item.id, WorkItemStatus::Pending));
    if let Err(err) = requeued {
        error!(job_id = %shared.job_id, item_id = %item.id, error = %err, "ORCHESTRATOR: Requeue failed");
    }
}

async fn publish_progress(
    shared: &Arc<WorkerShared>,
    item_id: &str,
    elapsed: std::time::Duration,
    cost: f64,
    (completed, failed, skipped): (usize, usize, usize),
) {
    match shared.tracker.update_progress(
        shared.job_id,
        completed,
        failed,
        skipped,
        item_id,
        elapsed,
        cost,
    ) {
        Ok(update) => {
            let should_checkpoint = update.should_checkpoint;
            shared
                .events
                .publish(ProgressEvent::ProgressUpdated { update });
            if should_checkpoint {
                save_checkpoint(shared).await;
            }
        }
        Err(err) => {
            warn!(job_id = %shared.job_id, error = %err, "ORCHESTRATOR: Progress update dropped");
        }
    }
}

/// Merge the tracker's analytics state into the aggregate, then persist
async fn save_checkpoint(shared: &Arc<WorkerShared>) {
    if let Ok(state) = shared.tracker.export_state(shared.job_id) {
        let mut guard = shared.job.lock().await;
        guard.progress.history = state.history;
        guard.progress.total_cost_accumulated = state.total_cost_accumulated;
    }
    match shared.manager.save_checkpoint(shared.job_id).await {
        Ok(()) => shared.events.publish(ProgressEvent::CheckpointSaved {
            job_id: shared.job_id,
            at: Utc::now(),
        }),
        Err(err) => {
            error!(job_id = %shared.job_id, error = %err, "💾 ORCHESTRATOR: Checkpoint save failed");
        }
    }
}

async fn pause_job(shared: &Arc<WorkerShared>, reason: String) {
    let mut guard = shared.job.lock().await;
    if guard.status == JobStatus::Running && guard.transition_to(JobStatus::Paused).is_ok() {
        *shared.pause_reason.lock() = Some(reason.clone());
        warn!(job_id = %shared.job_id, reason = %reason, "⏸️ ORCHESTRATOR: Job pausing");
    }
}

async fn fail_job(shared: &Arc<WorkerShared>, summary: String) {
    let mut guard = shared.job.lock().await;
    if !guard.status.is_terminal() {
        guard.error_summary = Some(summary.clone());
        if guard.transition_to(JobStatus::Failed).is_ok() {
            error!(job_id = %shared.job_id, error = %summary, "❌ ORCHESTRATOR: Batch failing");
        }
    }
}
