//! # Persisted Progress State
//!
//! Bounded progress history owned by the tracker but persisted as part of the
//! job aggregate so that throughput analytics survive a resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One observation of job progress at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub timestamp: DateTime<Utc>,
    pub completed: usize,
    pub failed: usize,
    /// Wall-clock time the item that triggered this snapshot took
    pub processing_time_ms: u64,
    /// Cost attributed to the item that triggered this snapshot
    pub cost: f64,
}

/// Progress state persisted as part of [`crate::models::BatchJob`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgressState {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Rolling snapshot history, capped at `max_history` entries.
    /// Older entries are discarded (ring buffer semantics) to bound memory
    /// over multi-hour jobs.
    pub history: VecDeque<ProgressSnapshot>,

    /// Every attempt's cost is counted, including partial cost on retried
    /// items (additive accounting)
    pub total_cost_accumulated: f64,

    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    1000
}

impl JobProgressState {
    pub fn new(total: usize) -> Self {
        Self::with_history_cap(total, default_max_history())
    }

    pub fn with_history_cap(total: usize, max_history: usize) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
            skipped: 0,
            history: VecDeque::new(),
            total_cost_accumulated: 0.0,
            max_history,
        }
    }

    /// Append a snapshot, evicting the oldest entry once the cap is reached
    pub fn push_snapshot(&mut self, snapshot: ProgressSnapshot) {
        if self.history.len() >= self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(snapshot);
    }

    /// Items not yet in a terminal per-item state
    pub fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.completed + self.failed + self.skipped)
    }

    /// Completion percentage over terminal items
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        ((self.completed + self.failed + self.skipped) as f64 / self.total as f64) * 100.0
    }
}
