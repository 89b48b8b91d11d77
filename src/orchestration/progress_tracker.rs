//! # Progress Tracking and ETA Analytics
//!
//! Consumes per-item completion events, maintains the bounded snapshot
//! history, and produces throughput/ETA analytics. Throughput is a weighted
//! moving average over consecutive snapshot deltas with weights increasing
//! linearly toward the most recent sample, so recent throughput dominates
//! historical throughput. The ETA carries a variance buffer and is undefined
//! until at least three samples exist.
//!
//! All bookkeeping here is non-suspending; the per-job lock is held only for
//! O(history) arithmetic.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::ProgressConfig;
use crate::error::{BatchCoreError, Result};
use crate::models::progress::{JobProgressState, ProgressSnapshot};
use crate::orchestration::types::ProgressUpdate;

/// Variance ratio above which the larger ETA inflation factor applies
const HIGH_VARIANCE_THRESHOLD: f64 = 0.3;

struct TrackedJob {
    progress: JobProgressState,
    checkpoint_interval: usize,
    /// Last completed+failed count at which a checkpoint was flagged
    last_checkpoint_mark: usize,
}

/// Per-job progress tracker
pub struct ProgressTracker {
    config: ProgressConfig,
    jobs: DashMap<Uuid, Mutex<TrackedJob>>,
}

impl ProgressTracker {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            jobs: DashMap::new(),
        }
    }

    /// Begin tracking a new job
    pub fn track_job(&self, job_id: Uuid, total: usize, checkpoint_interval: usize) {
        self.jobs.insert(
            job_id,
            Mutex::new(TrackedJob {
                progress: JobProgressState::with_history_cap(
                    total,
                    self.config.max_history_entries,
                ),
                checkpoint_interval,
                last_checkpoint_mark: 0,
            }),
        );
    }

    /// Rehydrate tracking from a checkpointed progress state on resume
    pub fn restore_job(
        &self,
        job_id: Uuid,
        progress: JobProgressState,
        checkpoint_interval: usize,
    ) {
        let mark = progress.completed + progress.failed;
        self.jobs.insert(
            job_id,
            Mutex::new(TrackedJob {
                progress,
                checkpoint_interval,
                last_checkpoint_mark: mark,
            }),
        );
    }

    /// Record one item outcome and produce fresh analytics
    #[allow(clippy::too_many_arguments)]
    pub fn update_progress(
        &self,
        job_id: Uuid,
        completed: usize,
        failed: usize,
        skipped: usize,
        current_item_id: &str,
        processing_time: Duration,
        cost: f64,
    ) -> Result<ProgressUpdate> {
        let entry = self
            .jobs
            .get(&job_id)
            .ok_or(BatchCoreError::JobNotFound(job_id))?;
        let mut tracked = entry.lock();

        tracked.progress.completed = completed;
        tracked.progress.failed = failed;
        tracked.progress.skipped = skipped;
        tracked.progress.total_cost_accumulated += cost;

        let snapshot = ProgressSnapshot {
            timestamp: Utc::now(),
            completed,
            failed,
            processing_time_ms: processing_time.as_millis() as u64,
            cost,
        };
        tracked.progress.push_snapshot(snapshot);

        let (current_rate, eta_prediction) = self.compute_rate_and_eta(&tracked.progress);

        let processed = completed + failed;
        let should_checkpoint = tracked.checkpoint_interval > 0
            && processed > 0
            && processed % tracked.checkpoint_interval == 0
            && processed != tracked.last_checkpoint_mark;
        if should_checkpoint {
            tracked.last_checkpoint_mark = processed;
        }

        let terminal = completed + failed + skipped;
        let projected_total_cost = if terminal > 0 {
            Some(
                tracked.progress.total_cost_accumulated / terminal as f64
                    * tracked.progress.total as f64,
            )
        } else {
            None
        };

        let update = ProgressUpdate {
            job_id,
            completed,
            failed,
            skipped,
            total: tracked.progress.total,
            percent_complete: tracked.progress.percent_complete(),
            current_rate,
            eta_prediction,
            total_cost: tracked.progress.total_cost_accumulated,
            projected_total_cost,
            should_checkpoint,
        };

        debug!(
            job_id = %job_id,
            item_id = %current_item_id,
            completed = completed,
            failed = failed,
            percent = update.percent_complete,
            rate = update.current_rate,
            should_checkpoint = should_checkpoint,
            "PROGRESS: Update recorded"
        );

        Ok(update)
    }

    /// Export progress state for inclusion in a checkpoint
    pub fn export_state(&self, job_id: Uuid) -> Result<JobProgressState> {
        let entry = self
            .jobs
            .get(&job_id)
            .ok_or(BatchCoreError::JobNotFound(job_id))?;
        let tracked = entry.lock();
        Ok(tracked.progress.clone())
    }

    /// Drop tracking state for a finished job
    pub fn forget(&self, job_id: Uuid) {
        self.jobs.remove(&job_id);
    }

    /// Weighted moving average rate over consecutive snapshot deltas, plus
    /// the variance-buffered ETA. Both are None below the sample minimum.
    fn compute_rate_and_eta(
        &self,
        progress: &JobProgressState,
    ) -> (Option<f64>, Option<DateTime<Utc>>) {
        let history = &progress.history;
        if history.len() < self.config.min_samples_for_eta {
            return (None, None);
        }

        let mut rates = Vec::with_capacity(history.len() - 1);
        for pair in history.iter().collect::<Vec<_>>().windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let d_items = (next.completed + next.failed)
                .saturating_sub(prev.completed + prev.failed);
            if d_items == 0 {
                continue;
            }
            let d_t = (next.timestamp - prev.timestamp)
                .num_milliseconds()
                .max(0) as f64
                / 1000.0;
            let rate = if d_t > 0.0 {
                d_items as f64 / d_t
            } else if next.processing_time_ms > 0 {
                // Snapshots landed inside the same millisecond; fall back to
                // the item's own processing time
                d_items as f64 / (next.processing_time_ms as f64 / 1000.0)
            } else {
                continue;
            };
            rates.push(rate);
        }

        if rates.is_empty() {
            return (None, None);
        }

        // Linear weights: sample i of n gets weight i/n
        let n = rates.len() as f64;
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (i, rate) in rates.iter().enumerate() {
            let weight = (i + 1) as f64 / n;
            weighted_sum += weight * rate;
            weight_total += weight;
        }
        let current_rate = weighted_sum / weight_total;
        if current_rate <= 0.0 {
            return (None, None);
        }

        let mean = rates.iter().sum::<f64>() / n;
        let variance = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        // Normalized variance so the buffer scales with rate magnitude
        let variance_ratio = if mean > 0.0 {
            variance / (mean * mean)
        } else {
            0.0
        };

        let remaining = progress.remaining() as f64;
        let base_seconds = remaining / current_rate;
        let buffer_seconds = remaining * variance_ratio / current_rate;
        let inflation = if variance_ratio > HIGH_VARIANCE_THRESHOLD {
            1.2
        } else {
            1.1
        };
        let eta_seconds = (base_seconds + buffer_seconds) * inflation;

        let eta = Utc::now()
            + ChronoDuration::milliseconds((eta_seconds * 1000.0).min(i64::MAX as f64) as i64);
        (Some(current_rate), Some(eta))
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ProgressTracker {
        ProgressTracker::default()
    }

    #[test]
    fn test_eta_undefined_below_three_samples() {
        let t = tracker();
        let job_id = Uuid::new_v4();
        t.track_job(job_id, 10, 5);

        let first = t
            .update_progress(job_id, 1, 0, 0, "item-0", Duration::from_millis(100), 0.01)
            .unwrap();
        assert!(first.eta_prediction.is_none());
        assert!(first.current_rate.is_none());

        let second = t
            .update_progress(job_id, 2, 0, 0, "item-1", Duration::from_millis(100), 0.01)
            .unwrap();
        assert!(second.eta_prediction.is_none());

        let third = t
            .update_progress(job_id, 3, 0, 0, "item-2", Duration::from_millis(100), 0.01)
            .unwrap();
        assert!(third.eta_prediction.is_some());
        assert!(third.current_rate.unwrap() > 0.0);
        assert!(third.eta_prediction.unwrap() > Utc::now() - ChronoDuration::seconds(1));
    }

    #[test]
    fn test_checkpoint_flag_every_interval() {
        let t = tracker();
        let job_id = Uuid::new_v4();
        t.track_job(job_id, 10, 3);

        let mut flags = Vec::new();
        for i in 1..=9usize {
            let update = t
                .update_progress(
                    job_id,
                    i,
                    0,
                    0,
                    &format!("item-{i}"),
                    Duration::from_millis(50),
                    0.0,
                )
                .unwrap();
            flags.push(update.should_checkpoint);
        }
        assert_eq!(
            flags,
            vec![false, false, true, false, false, true, false, false, true]
        );
    }

    #[test]
    fn test_cost_is_additive_across_attempts() {
        let t = tracker();
        let job_id = Uuid::new_v4();
        t.track_job(job_id, 5, 100);

        // Two updates for the same item (a retry after partial cost): both
        // attempts' costs count
        t.update_progress(job_id, 0, 1, 0, "item-0", Duration::from_millis(10), 0.05)
            .unwrap();
        let update = t
            .update_progress(job_id, 1, 0, 0, "item-0", Duration::from_millis(10), 0.07)
            .unwrap();
        assert!((update.total_cost - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_restore_preserves_checkpoint_cadence() {
        let t = tracker();
        let job_id = Uuid::new_v4();

        let mut state = JobProgressState::new(20);
        state.completed = 6;
        t.restore_job(job_id, state, 3);

        // 6 was already checkpointed; the next flag comes at 9
        let update = t
            .update_progress(job_id, 7, 0, 0, "item-6", Duration::from_millis(10), 0.0)
            .unwrap();
        assert!(!update.should_checkpoint);
        t.update_progress(job_id, 8, 0, 0, "item-7", Duration::from_millis(10), 0.0)
            .unwrap();
        let ninth = t
            .update_progress(job_id, 9, 0, 0, "item-8", Duration::from_millis(10), 0.0)
            .unwrap();
        assert!(ninth.should_checkpoint);
    }

    #[test]
    fn test_unknown_job_is_an_error() {
        let t = tracker();
        let result = t.update_progress(
            Uuid::new_v4(),
            1,
            0,
            0,
            "item-0",
            Duration::from_millis(10),
            0.0,
        );
        assert!(matches!(result, Err(BatchCoreError::JobNotFound(_))));
    }

    #[test]
    fn test_projected_cost_scales_linearly() {
        let t = tracker();
        let job_id = Uuid::new_v4();
        t.track_job(job_id, 10, 100);

        t.update_progress(job_id, 1, 0, 0, "item-0", Duration::from_millis(10), 0.02)
            .unwrap();
        let update = t
            .update_progress(job_id, 2, 0, 0, "item-1", Duration::from_millis(10), 0.02)
            .unwrap();
        let projected = update.projected_total_cost.unwrap();
        assert!((projected - 0.2).abs() < 1e-9);
    }
}
