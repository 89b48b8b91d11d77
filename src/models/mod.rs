//! # Batch Data Model
//!
//! Core persisted data structures: work items, the batch job aggregate, and
//! the progress state that rides along with it in checkpoints.
//!
//! - [`work_item`] - The unit of batch work and its per-item state machine
//! - [`batch_job`] - The aggregate root with the job-level state machine
//! - [`progress`] - Bounded progress history persisted for resume

pub mod batch_job;
pub mod progress;
pub mod work_item;

pub use batch_job::{BatchJob, JobStatus};
pub use progress::{JobProgressState, ProgressSnapshot};
pub use work_item::{WorkItem, WorkItemStatus};
