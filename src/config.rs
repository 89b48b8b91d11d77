//! # Configuration Management
//!
//! Typed configuration for batch jobs and the orchestration components.
//! [`JobSpec`] is the immutable batch-level configuration owned by a job;
//! the remaining structs tune individual components and carry sensible
//! defaults for production workloads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BatchCoreError, Result};

/// Immutable batch-level configuration, read-only after job creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Upper bound on concurrent workers for this job
    pub max_concurrency: usize,

    /// Checkpoint every N completed+failed items
    pub checkpoint_interval: usize,

    /// Global retry ceiling per item, independent of per-classification limits
    pub max_retries_per_item: u32,

    /// Per-operation-class rate limits (operation name -> limit)
    pub rate_limits: HashMap<String, RateLimitConfig>,

    /// Wall-clock bound on a single item dispatch
    pub timeout_per_item: Duration,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            checkpoint_interval: 10,
            max_retries_per_item: 3,
            rate_limits: HashMap::new(),
            timeout_per_item: Duration::from_secs(120),
        }
    }
}

impl JobSpec {
    /// Validate the spec before a job is created from it
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(BatchCoreError::InvalidParameter(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(BatchCoreError::InvalidParameter(
                "checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.timeout_per_item.is_zero() {
            return Err(BatchCoreError::InvalidParameter(
                "timeout_per_item must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-operation-class rate limit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained per-minute cap
    pub requests_per_minute: u32,

    /// Hard hourly cap
    pub requests_per_hour: u32,

    /// Requests allowed above the per-minute cap before throttling kicks in
    pub burst_allowance: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            burst_allowance: 5,
        }
    }
}

/// Adaptive concurrency scaling policy, evaluated on a fixed interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Interval between scaling evaluations
    pub evaluation_interval: Duration,

    /// Rolling performance window the evaluation looks at
    pub performance_window: Duration,

    /// CPU usage (0.0-1.0) above which concurrency is reduced
    pub cpu_high_watermark: f64,

    /// Memory usage (0.0-1.0) above which concurrency is reduced
    pub memory_high_watermark: f64,

    /// Windowed error rate above which concurrency is reduced
    pub error_rate_threshold: f64,

    /// Average response time above which concurrency is reduced
    pub response_time_threshold: Duration,

    /// Reduction factor applied under CPU/memory pressure
    pub resource_pressure_factor: f64,

    /// Reduction factor applied under high error rate
    pub error_rate_factor: f64,

    /// Reduction factor applied under high latency
    pub latency_factor: f64,

    /// Growth factor applied after a stable window
    pub increase_factor: f64,

    /// Hard ceiling on effective concurrency regardless of job spec
    pub hard_ceiling: usize,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(5),
            performance_window: Duration::from_secs(60),
            cpu_high_watermark: 0.85,
            memory_high_watermark: 0.90,
            error_rate_threshold: 0.10,
            response_time_threshold: Duration::from_secs(10),
            resource_pressure_factor: 0.8,
            error_rate_factor: 0.6,
            latency_factor: 0.7,
            increase_factor: 1.1,
            hard_ceiling: 50,
        }
    }
}

/// Progress tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Cap on retained progress snapshots per job (ring buffer semantics)
    pub max_history_entries: usize,

    /// Minimum samples before an ETA is produced
    pub min_samples_for_eta: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_history_entries: 1000,
            min_samples_for_eta: 3,
        }
    }
}
