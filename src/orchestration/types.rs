//! # Shared Orchestration Types
//!
//! Value objects that flow between the orchestrator, classifier, circuit
//! breaker, and progress tracker. Phase results are explicit structs and
//! tagged unions constructed once; no runtime attribute probing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Error raised by the external work function for one item attempt.
///
/// Carries the provider's message (the classifier's keyword heuristics run
/// over it) plus an optional HTTP-ish status code when the provider exposes
/// one.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct WorkError {
    pub message: String,
    pub status_code: Option<u16>,
}

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
        }
    }
}

/// Successful result of one item attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOutput {
    /// Opaque result payload stored on the item
    pub result: serde_json::Value,
    /// Cost of this attempt (tokens, credits); accounted additively across
    /// attempts
    pub cost: f64,
}

/// The external unit-of-work operation, supplied by the caller.
///
/// Precondition the orchestrator relies on: re-invoking this function on an
/// item whose prior attempt's outcome is unknown is safe (at-least-once
/// semantics). The core does not guarantee at-most-once execution.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Run one attempt for one item. `cancel` flips to `true` when the run
    /// is being cancelled; an implementation that can abort its provider
    /// call should select against it, and one that cannot may ignore it and
    /// finish normally.
    async fn execute(
        &self,
        payload: &serde_json::Value,
        cancel: watch::Receiver<bool>,
    ) -> Result<WorkOutput, WorkError>;

    /// Operation class this handler's requests count against in the job's
    /// `rate_limits` map
    fn operation_name(&self) -> &str {
        "default"
    }
}

/// Failure category produced by keyword-based classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Network,
    RateLimit,
    Auth,
    Validation,
    Timeout,
    Unknown,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureCategory::Network => "network",
            FailureCategory::RateLimit => "rate_limit",
            FailureCategory::Auth => "auth",
            FailureCategory::Validation => "validation",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The orchestrator's decision after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-dispatch immediately
    RetryNow,
    /// Re-dispatch after the classification's suggested delay
    RetryAfterDelay,
    /// Mark the item skipped and move on
    SkipItem,
    /// Pause the whole job; needs human attention (e.g. credential rotation)
    PauseJob,
    /// Fail the whole batch; unrecoverable systemic condition
    FailBatch,
}

/// Result of classifying one failure. Recomputed fresh for every failure and
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureClassification {
    pub category: FailureCategory,
    pub is_retryable: bool,
    /// Per-classification retry ceiling; the lower of this and the job's
    /// `max_retries_per_item` governs
    pub max_retries: u32,
    pub suggested_delay: Duration,
    pub recovery_action: RecoveryAction,
    /// Heuristic confidence, 0.0-1.0; the classifier is explicitly allowed
    /// to be wrong
    pub confidence: f64,
}

/// Progress analytics emitted after each item completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: Uuid,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub percent_complete: f64,
    /// Weighted moving average throughput, items per second
    pub current_rate: Option<f64>,
    /// Undefined (None) until at least three samples exist
    pub eta_prediction: Option<DateTime<Utc>>,
    pub total_cost: f64,
    /// Linear cost projection to job completion
    pub projected_total_cost: Option<f64>,
    /// Set every `checkpoint_interval` completed+failed items
    pub should_checkpoint: bool,
}

/// Push-based progress events delivered to external sinks, fire-and-forget
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    JobStarted {
        job_id: Uuid,
        total_items: usize,
        started_at: DateTime<Utc>,
    },
    ProgressUpdated {
        update: ProgressUpdate,
    },
    CheckpointSaved {
        job_id: Uuid,
        at: DateTime<Utc>,
    },
    JobPaused {
        job_id: Uuid,
        reason: String,
    },
    JobCompleted {
        job_id: Uuid,
        summary: BatchSummary,
    },
    JobFailed {
        job_id: Uuid,
        error_summary: String,
    },
    JobCancelled {
        job_id: Uuid,
    },
}

/// Final accounting for one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub job_id: Uuid,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub total_cost: f64,
    /// Failure categories encountered during the run, with counts
    pub failure_breakdown: HashMap<FailureCategory, u32>,
    pub elapsed: Duration,
}

impl BatchSummary {
    /// Human-readable breakdown for `error_summary` on failed jobs
    pub fn describe_failures(&self) -> String {
        if self.failure_breakdown.is_empty() {
            return "no failures recorded".to_string();
        }
        let mut parts: Vec<String> = self
            .failure_breakdown
            .iter()
            .map(|(category, count)| format!("{category}: {count}"))
            .collect();
        parts.sort();
        parts.join(", ")
    }
}
