//! # Per-Job Circuit Breaker
//!
//! Tracks failure density per job and trips to an open state once the
//! configured thresholds are exceeded. While open, the orchestrator pauses
//! the job instead of dispatching further items. The breaker auto-resets
//! after a recovery timeout, zeroing its counters to allow a fresh trial
//! window.
//!
//! State is in-memory only and rebuildable from recent history on resume;
//! it is deliberately not part of the checkpoint payload.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::CircuitBreakerConfig;
use crate::orchestration::types::FailureClassification;

/// Per-job failure counters
#[derive(Debug, Clone)]
struct CircuitState {
    total_operations: u64,
    failure_count: u64,
    circuit_open: bool,
    opened_at: Option<Instant>,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            total_operations: 0,
            failure_count: 0,
            circuit_open: false,
            opened_at: None,
        }
    }

    fn reset(&mut self) {
        self.total_operations = 0;
        self.failure_count = 0;
        self.circuit_open = false;
        self.opened_at = None;
    }

    fn failure_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_operations as f64
    }
}

/// Read-only view of a job's circuit state for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub total_operations: u64,
    pub failure_count: u64,
    pub failure_rate: f64,
    pub circuit_open: bool,
    pub open_remaining: Option<Duration>,
}

/// Circuit breaker guarding every running job
#[derive(Debug)]
pub struct JobCircuitBreaker {
    config: CircuitBreakerConfig,
    states: DashMap<Uuid, CircuitState>,
}

impl JobCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Record a successful operation for a job
    pub fn record_success(&self, job_id: Uuid) {
        let mut state = self.states.entry(job_id).or_insert_with(CircuitState::new);
        self.maybe_auto_reset(job_id, &mut state);
        state.total_operations += 1;
    }

    /// Record a failed operation and report whether the circuit should trip.
    /// Called on every classified failure; the classification is accepted so
    /// callers have one call site regardless of category.
    pub fn should_trip(&self, job_id: Uuid, classification: &FailureClassification) -> bool {
        let mut state = self.states.entry(job_id).or_insert_with(CircuitState::new);
        self.maybe_auto_reset(job_id, &mut state);

        state.total_operations += 1;
        state.failure_count += 1;

        if state.circuit_open {
            return true;
        }

        let trip = state.total_operations >= self.config.minimum_operations
            && state.failure_count >= self.config.failure_threshold
            && state.failure_rate() > self.config.failure_rate_threshold;

        if trip {
            state.circuit_open = true;
            state.opened_at = Some(Instant::now());
            warn!(
                job_id = %job_id,
                failures = state.failure_count,
                operations = state.total_operations,
                failure_rate = state.failure_rate(),
                category = %classification.category,
                recovery_timeout_secs = self.config.recovery_timeout.as_secs(),
                "🔴 CIRCUIT: Opened for job (failing fast)"
            );
        } else {
            debug!(
                job_id = %job_id,
                failures = state.failure_count,
                operations = state.total_operations,
                "CIRCUIT: Failure recorded, below trip thresholds"
            );
        }

        trip
    }

    /// Whether the circuit for a job is currently open
    pub fn is_open(&self, job_id: Uuid) -> bool {
        if let Some(mut state) = self.states.get_mut(&job_id) {
            self.maybe_auto_reset(job_id, &mut state);
            state.circuit_open
        } else {
            false
        }
    }

    /// Snapshot for diagnostics and health reporting
    pub fn snapshot(&self, job_id: Uuid) -> Option<CircuitSnapshot> {
        self.states.get(&job_id).map(|state| CircuitSnapshot {
            total_operations: state.total_operations,
            failure_count: state.failure_count,
            failure_rate: state.failure_rate(),
            circuit_open: state.circuit_open,
            open_remaining: state.opened_at.and_then(|opened| {
                self.config
                    .recovery_timeout
                    .checked_sub(opened.elapsed())
            }),
        })
    }

    /// Drop all state for a finished job
    pub fn forget(&self, job_id: Uuid) {
        self.states.remove(&job_id);
    }

    fn maybe_auto_reset(&self, job_id: Uuid, state: &mut CircuitState) {
        if state.circuit_open {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    info!(
                        job_id = %job_id,
                        "🟢 CIRCUIT: Recovery timeout elapsed, resetting for a fresh trial window"
                    );
                    state.reset();
                }
            }
        }
    }
}
