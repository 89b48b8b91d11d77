//! # Persistence Boundary
//!
//! The checkpoint store contract and its two implementations: an in-memory
//! store for tests and short-lived runs, and a file-backed store that writes
//! whole-job JSON atomically (temp file + rename) so a crash never leaves a
//! truncated checkpoint behind.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BatchCoreError, Result};
use crate::models::BatchJob;

/// Durable store for whole-job checkpoints. The core only requires atomic
/// whole-job writes at checkpoint boundaries.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &BatchJob) -> Result<()>;
    async fn load(&self, job_id: Uuid) -> Result<BatchJob>;
}

/// In-memory store; the default when no durable backend is wired in
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, BatchJob>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, job: &BatchJob) -> Result<()> {
        self.jobs.insert(job.job_id, job.clone());
        debug!(job_id = %job.job_id, "STORE: Checkpoint saved (in-memory)");
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<BatchJob> {
        self.jobs
            .get(&job_id)
            .map(|entry| entry.clone())
            .ok_or(BatchCoreError::JobNotFound(job_id))
    }
}

/// File-backed store: one JSON file per job under a base directory
#[derive(Debug, Clone)]
pub struct FileJobStore {
    base_dir: PathBuf,
}

impl FileJobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn job_path(&self, job_id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{job_id}.json"))
    }

    fn tmp_path(&self, job_id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{job_id}.json.tmp"))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn save(&self, job: &BatchJob) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| BatchCoreError::Persistence(format!("create checkpoint dir: {e}")))?;

        let payload = serde_json::to_vec_pretty(job)
            .map_err(|e| BatchCoreError::Persistence(format!("serialize job: {e}")))?;

        // Write-then-rename keeps the visible checkpoint whole at all times
        let tmp = self.tmp_path(job.job_id);
        let path = self.job_path(job.job_id);
        tokio::fs::write(&tmp, &payload)
            .await
            .map_err(|e| BatchCoreError::Persistence(format!("write checkpoint: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| BatchCoreError::Persistence(format!("publish checkpoint: {e}")))?;

        info!(
            job_id = %job.job_id,
            path = %path.display(),
            bytes = payload.len(),
            "💾 STORE: Checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<BatchJob> {
        let path = self.job_path(job_id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BatchCoreError::JobNotFound(job_id)
            } else {
                BatchCoreError::Persistence(format!("read checkpoint: {e}"))
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BatchCoreError::Persistence(format!("deserialize job: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSpec;
    use crate::models::WorkItem;
    use serde_json::json;

    fn sample_job() -> BatchJob {
        let items = vec![
            WorkItem::new("a", json!({"name": "A"})),
            WorkItem::new("b", json!({"name": "B"})),
        ];
        BatchJob::new(items, JobSpec::default())
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryJobStore::new();
        let job = sample_job();
        store.save(&job).await.unwrap();

        let loaded = store.load(job.job_id).await.unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert_eq!(loaded.items.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let store = InMemoryJobStore::new();
        assert!(matches!(
            store.load(Uuid::new_v4()).await,
            Err(BatchCoreError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let job = sample_job();

        store.save(&job).await.unwrap();
        let loaded = store.load(job.job_id).await.unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert_eq!(loaded.spec.max_concurrency, job.spec.max_concurrency);

        // No temp file left behind after a successful save
        assert!(!dir.path().join(format!("{}.json.tmp", job.job_id)).exists());
    }

    #[tokio::test]
    async fn test_file_store_overwrites_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());
        let mut job = sample_job();

        store.save(&job).await.unwrap();
        job.progress.completed = 1;
        store.save(&job).await.unwrap();

        let loaded = store.load(job.job_id).await.unwrap();
        assert_eq!(loaded.progress.completed, 1);
    }
}
