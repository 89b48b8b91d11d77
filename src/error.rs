//! # Structured Error Handling
//!
//! Crate-level error type for the batch orchestration core. Per-item work
//! failures are represented separately (see [`crate::orchestration::types::WorkError`])
//! and are always converted into recovery actions at the orchestrator boundary;
//! the variants here cover unrecoverable infrastructure and lifecycle errors only.

use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchCoreError {
    /// The persistence boundary rejected a checkpoint save or load
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// No job with the given id is known to the manager or store
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    /// An operation requested a job state transition the state machine forbids
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// A configuration or API parameter was out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The job reached its terminal failed state
    #[error("Job {job_id} failed: {summary}")]
    JobFailed { job_id: Uuid, summary: String },
}

pub type Result<T> = std::result::Result<T, BatchCoreError>;
