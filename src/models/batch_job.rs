//! # Batch Job Aggregate
//!
//! The aggregate root for a batch run: spec, ordered items, progress state,
//! and the job-level state machine. Item order defines processing priority,
//! not a correctness requirement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JobSpec;
use crate::error::{BatchCoreError, Result};
use crate::models::progress::JobProgressState;
use crate::models::work_item::{WorkItem, WorkItemStatus};

/// Job lifecycle states
///
/// `Pending -> Running -> {Completed, Failed, Cancelled}`; `Running <-> Paused`.
/// Terminal states are final and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// State machine edges. Pause is reachable only from Running (circuit
    /// breaker trip or explicit user action); Paused resumes to Running.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Per-status item counts used for invariant checks and reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ItemCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.succeeded + self.failed + self.skipped
    }
}

/// Aggregate root for one batch run; this is the checkpoint payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub spec: JobSpec,
    pub items: Vec<WorkItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: JobProgressState,
    pub error_summary: Option<String>,
}

impl BatchJob {
    pub fn new(items: Vec<WorkItem>, spec: JobSpec) -> Self {
        let now = Utc::now();
        let total = items.len();
        Self {
            job_id: Uuid::new_v4(),
            status: JobStatus::Pending,
            spec,
            items,
            created_at: now,
            updated_at: now,
            completed_at: None,
            progress: JobProgressState::new(total),
            error_summary: None,
        }
    }

    /// Transition job status, enforcing the state machine
    pub fn transition_to(&mut self, target: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(BatchCoreError::InvalidTransition(format!(
                "job {} cannot move from {} to {}",
                self.job_id, self.status, target
            )));
        }
        self.status = target;
        self.updated_at = Utc::now();
        if target.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Transition one item, enforcing forward-only per-item transitions and
    /// keeping the progress counters in sync under the caller's job lock
    pub fn transition_item(&mut self, item_id: &str, target: WorkItemStatus) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| {
                BatchCoreError::InvalidParameter(format!("unknown item id: {item_id}"))
            })?;

        if !item.status.can_transition_to(target) {
            return Err(BatchCoreError::InvalidTransition(format!(
                "item {item_id} cannot move from {} to {}",
                item.status, target
            )));
        }

        // Failed -> Pending retry re-entry removes the item from the failed tally
        match (item.status, target) {
            (WorkItemStatus::Failed, WorkItemStatus::Pending) => {
                self.progress.failed = self.progress.failed.saturating_sub(1);
            }
            (_, WorkItemStatus::Succeeded) => self.progress.completed += 1,
            (_, WorkItemStatus::Failed) => self.progress.failed += 1,
            (_, WorkItemStatus::Skipped) => self.progress.skipped += 1,
            _ => {}
        }

        item.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Current per-status item counts
    pub fn item_counts(&self) -> ItemCounts {
        let mut counts = ItemCounts::default();
        for item in &self.items {
            match item.status {
                WorkItemStatus::Pending => counts.pending += 1,
                WorkItemStatus::InProgress => counts.in_progress += 1,
                WorkItemStatus::Succeeded => counts.succeeded += 1,
                WorkItemStatus::Failed => counts.failed += 1,
                WorkItemStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// `completed + failed + skipped + pending + in_progress == total`
    pub fn accounting_holds(&self) -> bool {
        self.item_counts().total() == self.progress.total
            && self.items.len() == self.progress.total
    }

    /// A job may complete only when every item is succeeded or skipped
    pub fn all_items_settled(&self) -> bool {
        self.items.iter().all(|i| {
            matches!(
                i.status,
                WorkItemStatus::Succeeded | WorkItemStatus::Skipped
            )
        })
    }

    /// Next dispatchable item in submission order, marked in-progress
    pub fn claim_next_pending(&mut self) -> Option<WorkItem> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.status == WorkItemStatus::Pending)?;
        item.status = WorkItemStatus::InProgress;
        item.attempt_count += 1;
        Some(item.clone())
    }

    /// Reset items whose outcome is unknown back to pending. Used on resume:
    /// the work function's at-least-once precondition makes this safe.
    pub fn reset_in_progress_items(&mut self) -> usize {
        let mut reset = 0;
        for item in &mut self.items {
            if item.status == WorkItemStatus::InProgress {
                item.status = WorkItemStatus::Pending;
                reset += 1;
            }
        }
        reset
    }
}
