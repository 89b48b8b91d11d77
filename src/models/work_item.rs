//! # Work Item Model
//!
//! One unit of batch work (e.g. one company to research). Items are created
//! at job submission and only ever transition forward; they are the unit of
//! resumability, so terminal per-item states never regress.

use serde::{Deserialize, Serialize};

/// Per-item processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Waiting to be dispatched (initial state, also the retry re-entry state)
    Pending,
    /// Claimed by a worker, outcome unknown
    InProgress,
    /// Terminal: the work function returned a result
    Succeeded,
    /// Terminal for this attempt chain: retries exhausted or non-retryable
    Failed,
    /// Terminal: classified as permanently invalid, deliberately not processed
    Skipped,
}

impl WorkItemStatus {
    /// Whether an item in this status will never be dispatched again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Succeeded | WorkItemStatus::Failed | WorkItemStatus::Skipped
        )
    }

    /// Forward-only transition check. `Failed -> Pending` is allowed (retry);
    /// `Succeeded` and `Skipped` never regress.
    pub fn can_transition_to(&self, target: WorkItemStatus) -> bool {
        use WorkItemStatus::*;
        matches!(
            (self, target),
            (Pending, InProgress)
                | (InProgress, Succeeded)
                | (InProgress, Failed)
                | (InProgress, Skipped)
                | (InProgress, Pending) // resume resets unknown-outcome items
                | (Failed, Pending) // retry re-entry
        )
    }
}

impl std::fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::InProgress => "in_progress",
            WorkItemStatus::Succeeded => "succeeded",
            WorkItemStatus::Failed => "failed",
            WorkItemStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// One unit of batch work plus its attempt bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique within the owning job
    pub id: String,

    /// Opaque input handed to the external work function
    pub payload: serde_json::Value,

    /// Number of dispatch attempts so far (0 until first dispatch)
    pub attempt_count: u32,

    /// Current per-item status
    pub status: WorkItemStatus,

    /// Result of the successful attempt, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Message from the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            attempt_count: 0,
            status: WorkItemStatus::Pending,
            result: None,
            last_error: None,
        }
    }
}
