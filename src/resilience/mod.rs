//! # Resilience Patterns
//!
//! Fault isolation for batch jobs. The per-job circuit breaker stops a broken
//! job from burning through its whole item set once failure density crosses a
//! threshold.

pub mod circuit_breaker;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use circuit_breaker::{CircuitSnapshot, JobCircuitBreaker};

/// Circuit breaker thresholds, per job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Never trip before this many operations have been observed
    pub minimum_operations: u64,

    /// Absolute failure count required to trip
    pub failure_threshold: u64,

    /// Failure density required to trip (failures / operations)
    pub failure_rate_threshold: f64,

    /// Open-state duration before the breaker auto-resets for a fresh trial
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            minimum_operations: 20,
            failure_threshold: 10,
            failure_rate_threshold: 0.5,
            recovery_timeout: Duration::from_secs(300),
        }
    }
}
