//! # Resource and Performance Monitoring
//!
//! Process-level resource sampling and the rolling performance window the
//! scaling engine evaluates against. Sampling happens on the coordinator's
//! background monitor interval, never on the dispatch hot path.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use sysinfo::System;
use tokio::time::Instant;
use tracing::debug;

/// Seam for resource sampling so scaling decisions are testable without a
/// live system
pub trait ResourceSampler: Send + Sync {
    /// Process-wide CPU usage, 0.0-1.0
    fn cpu_usage(&self) -> f64;
    /// System memory usage, 0.0-1.0
    fn memory_usage(&self) -> f64;
}

/// Live resource monitor backed by `sysinfo`
pub struct SystemResourceMonitor {
    system: Mutex<System>,
}

impl SystemResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }
}

impl Default for SystemResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemResourceMonitor {
    fn cpu_usage(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        (system.global_cpu_usage() as f64 / 100.0).clamp(0.0, 1.0)
    }

    fn memory_usage(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        (system.used_memory() as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// One dispatched-item observation
#[derive(Debug, Clone, Copy)]
struct OutcomeSample {
    at: Instant,
    response_time: Duration,
    success: bool,
}

/// Aggregate view of the rolling window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowStats {
    pub total: usize,
    pub failures: usize,
    pub error_rate: f64,
    pub average_response_time: Option<Duration>,
}

/// Rolling window of item outcomes feeding the scaling policy
#[derive(Debug)]
pub struct PerformanceWindow {
    window: Duration,
    samples: Mutex<VecDeque<OutcomeSample>>,
}

impl PerformanceWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an item outcome with its wall-clock response time
    pub fn record(&self, response_time: Duration, success: bool) {
        let mut samples = self.samples.lock();
        let now = Instant::now();
        samples.push_back(OutcomeSample {
            at: now,
            response_time,
            success,
        });
        Self::prune(&mut samples, now, self.window);
    }

    /// Current windowed statistics
    pub fn stats(&self) -> WindowStats {
        let mut samples = self.samples.lock();
        let now = Instant::now();
        Self::prune(&mut samples, now, self.window);

        let total = samples.len();
        if total == 0 {
            return WindowStats::default();
        }
        let failures = samples.iter().filter(|s| !s.success).count();
        let total_response: Duration = samples.iter().map(|s| s.response_time).sum();

        let stats = WindowStats {
            total,
            failures,
            error_rate: failures as f64 / total as f64,
            average_response_time: Some(total_response / total as u32),
        };
        debug!(
            total = stats.total,
            failures = stats.failures,
            error_rate = stats.error_rate,
            "MONITOR: Window stats computed"
        );
        stats
    }

    fn prune(samples: &mut VecDeque<OutcomeSample>, now: Instant, window: Duration) {
        while let Some(front) = samples.front() {
            if now.duration_since(front.at) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_stats_aggregate_outcomes() {
        let window = PerformanceWindow::new(Duration::from_secs(60));
        window.record(Duration::from_millis(100), true);
        window.record(Duration::from_millis(200), true);
        window.record(Duration::from_millis(300), false);

        let stats = window.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.failures, 1);
        assert!((stats.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            stats.average_response_time,
            Some(Duration::from_millis(200))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_samples_age_out() {
        let window = PerformanceWindow::new(Duration::from_secs(10));
        window.record(Duration::from_millis(100), false);

        tokio::time::sleep(Duration::from_secs(11)).await;
        window.record(Duration::from_millis(100), true);

        let stats = window.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn test_system_monitor_reports_bounded_values() {
        let monitor = SystemResourceMonitor::new();
        let cpu = monitor.cpu_usage();
        let mem = monitor.memory_usage();
        assert!((0.0..=1.0).contains(&cpu));
        assert!((0.0..=1.0).contains(&mem));
    }
}
