#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Batch Core
//!
//! Batch job orchestration core for long-running, failure-prone workloads
//! such as researching hundreds of companies through external AI and search
//! APIs.
//!
//! ## Overview
//!
//! A batch job is an ordered set of work items dispatched through a
//! caller-supplied async work function. The core owns everything around that
//! function: bounded adaptive parallelism, per-operation rate limiting,
//! failure classification with per-category recovery, a per-job circuit
//! breaker, progress analytics with ETA and cost projection, and crash-safe
//! checkpointing so any run can be resumed without losing completed work.
//!
//! ## Key Features
//!
//! - **Bounded adaptive parallelism**: a semaphore-backed worker pool whose
//!   effective concurrency scales with CPU, memory, error rate, and latency
//! - **Adaptive rate limiting**: sliding-window caps per operation class
//!   with exponential error backoff
//! - **Failure classification**: keyword and status-code heuristics mapping
//!   provider errors to retry, skip, pause, or fail decisions
//! - **Per-job circuit breaker**: failure-density tripping that pauses a
//!   broken job instead of burning through its item set
//! - **Crash-safe checkpointing**: the full job aggregate is persisted on a
//!   configurable cadence and on every lifecycle edge
//!
//! ## Module Organization
//!
//! - [`models`] - Work items, the batch job aggregate, progress state
//! - [`orchestration`] - Dispatch loop, lifecycle, classification, analytics
//! - [`rate_limiter`] - Adaptive per-operation rate limiting
//! - [`resilience`] - Per-job circuit breaker
//! - [`store`] - Checkpoint persistence boundary
//! - [`config`] - Job specs and component tuning
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use batch_core::config::JobSpec;
//! use batch_core::models::WorkItem;
//! use batch_core::orchestration::{BatchOrchestrator, JobManager, WorkError, WorkHandler, WorkOutput};
//! use batch_core::store::InMemoryJobStore;
//! use tokio::sync::watch;
//!
//! struct Research;
//!
//! #[async_trait]
//! impl WorkHandler for Research {
//!     async fn execute(
//!         &self,
//!         payload: &serde_json::Value,
//!         _cancel: watch::Receiver<bool>,
//!     ) -> Result<WorkOutput, WorkError> {
//!         Ok(WorkOutput { result: payload.clone(), cost: 0.01 })
//!     }
//! }
//!
//! # async fn run() -> batch_core::error::Result<()> {
//! let manager = Arc::new(JobManager::new(Arc::new(InMemoryJobStore::new())));
//! let orchestrator = BatchOrchestrator::new(manager.clone());
//!
//! let items = vec![WorkItem::new("acme-corp", serde_json::json!({"name": "Acme Corp"}))];
//! let job_id = manager.create_job(items, JobSpec::default()).await?;
//! let summary = orchestrator.run_job(job_id, Arc::new(Research)).await?;
//! assert_eq!(summary.completed, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod rate_limiter;
pub mod resilience;
pub mod store;

pub use config::{JobSpec, ProgressConfig, RateLimitConfig, ScalingConfig};
pub use error::{BatchCoreError, Result};
pub use models::{BatchJob, JobStatus, WorkItem, WorkItemStatus};
pub use orchestration::{
    BatchOrchestrator, BatchSummary, JobManager, ProgressEvent, ProgressUpdate, WorkError,
    WorkHandler, WorkOutput,
};
pub use rate_limiter::AdaptiveRateLimiter;
pub use resilience::{CircuitBreakerConfig, JobCircuitBreaker};
pub use store::{FileJobStore, InMemoryJobStore, JobStore};
