//! # Adaptive Concurrency Scaling
//!
//! Scaling policy evaluated on a fixed interval against the rolling
//! performance window and resource samples. Reductions shrink the number of
//! available pool permits (never killing in-flight work); a sustained stable
//! window earns a gradual increase back toward the configured ceiling.

use std::time::Duration;
use tracing::{debug, info};

use super::monitor::WindowStats;
use crate::config::ScalingConfig;

/// Outcome of one scaling evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalingDecision {
    /// Multiply effective concurrency by `factor` (< 1.0)
    Reduce {
        factor: f64,
        reason: ScalingReason,
    },
    /// Multiply effective concurrency by `factor` (> 1.0)
    Increase { factor: f64 },
    /// Leave concurrency unchanged
    Hold,
}

/// Why a reduction was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingReason {
    ResourcePressure,
    HighErrorRate,
    HighLatency,
}

impl std::fmt::Display for ScalingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScalingReason::ResourcePressure => "resource_pressure",
            ScalingReason::HighErrorRate => "high_error_rate",
            ScalingReason::HighLatency => "high_latency",
        };
        write!(f, "{s}")
    }
}

/// Stateful scaling engine; one per batch context
#[derive(Debug)]
pub struct ScalingEngine {
    config: ScalingConfig,
    /// Consecutive evaluations without a reduction
    stable_evaluations: u32,
    /// Stable evaluations required before an increase (one full window)
    stable_required: u32,
}

impl ScalingEngine {
    pub fn new(config: ScalingConfig) -> Self {
        let interval = config.evaluation_interval.max(Duration::from_millis(1));
        let stable_required = (config.performance_window.as_millis() / interval.as_millis())
            .max(1) as u32;
        Self {
            config,
            stable_evaluations: 0,
            stable_required,
        }
    }

    /// Evaluate one scaling step from resource samples and window stats
    pub fn evaluate(&mut self, cpu: f64, memory: f64, stats: &WindowStats) -> ScalingDecision {
        if cpu > self.config.cpu_high_watermark || memory > self.config.memory_high_watermark {
            self.stable_evaluations = 0;
            info!(
                cpu = cpu,
                memory = memory,
                factor = self.config.resource_pressure_factor,
                "🎛️ SCALING: Resource pressure, reducing concurrency"
            );
            return ScalingDecision::Reduce {
                factor: self.config.resource_pressure_factor,
                reason: ScalingReason::ResourcePressure,
            };
        }

        if stats.total > 0 && stats.error_rate > self.config.error_rate_threshold {
            self.stable_evaluations = 0;
            info!(
                error_rate = stats.error_rate,
                factor = self.config.error_rate_factor,
                "🎛️ SCALING: High error rate, reducing concurrency"
            );
            return ScalingDecision::Reduce {
                factor: self.config.error_rate_factor,
                reason: ScalingReason::HighErrorRate,
            };
        }

        if let Some(avg) = stats.average_response_time {
            if avg > self.config.response_time_threshold {
                self.stable_evaluations = 0;
                info!(
                    avg_response_ms = avg.as_millis() as u64,
                    factor = self.config.latency_factor,
                    "🎛️ SCALING: High latency, reducing concurrency"
                );
                return ScalingDecision::Reduce {
                    factor: self.config.latency_factor,
                    reason: ScalingReason::HighLatency,
                };
            }
        }

        self.stable_evaluations = self.stable_evaluations.saturating_add(1);
        if self.stable_evaluations >= self.stable_required {
            debug!(
                stable_evaluations = self.stable_evaluations,
                factor = self.config.increase_factor,
                "SCALING: Stable window, increasing concurrency"
            );
            return ScalingDecision::Increase {
                factor: self.config.increase_factor,
            };
        }

        ScalingDecision::Hold
    }

    /// Apply a decision to the current effective concurrency, clamped to
    /// `[1, ceiling]`. Rounds reductions down and growth up so small pools
    /// still move.
    pub fn apply(&self, decision: ScalingDecision, current: usize, ceiling: usize) -> usize {
        let target = match decision {
            ScalingDecision::Reduce { factor, .. } => {
                (current as f64 * factor).floor() as usize
            }
            ScalingDecision::Increase { factor } => {
                ((current as f64 * factor).ceil() as usize).max(current + 1)
            }
            ScalingDecision::Hold => current,
        };
        target.clamp(1, ceiling.max(1))
    }
}
