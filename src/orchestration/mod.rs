//! # Batch Orchestration
//!
//! The orchestration layer: job lifecycle management, the dispatch loop,
//! failure classification, progress analytics, and the concurrency
//! coordinator it all runs on.
//!
//! ## Key Components
//!
//! - [`core`] - The batch orchestrator and its dispatch loop
//! - [`job_manager`] - Job lifecycle, checkpointing, and resume
//! - [`coordinator`] - Bounded adaptive worker pool
//! - [`failure_classifier`] - Failure category and recovery action heuristics
//! - [`progress_tracker`] - Throughput, ETA, and cost analytics
//! - [`event_publisher`] - Push-based progress event delivery
//! - [`types`] - Value objects shared across the layer

pub mod coordinator;
pub mod core;
pub mod event_publisher;
pub mod failure_classifier;
pub mod job_manager;
pub mod progress_tracker;
pub mod types;

pub use coordinator::{BatchContext, BatchHealth, ConcurrencyController, ProcessingSlot};
pub use core::BatchOrchestrator;
pub use event_publisher::ProgressEventPublisher;
pub use failure_classifier::{FailureClassifier, KeywordClassifier};
pub use job_manager::JobManager;
pub use progress_tracker::ProgressTracker;
pub use types::{
    BatchSummary, FailureCategory, FailureClassification, ProgressEvent, ProgressUpdate,
    RecoveryAction, WorkError, WorkHandler, WorkOutput,
};
