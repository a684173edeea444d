//! Ingestion job: moves a spooled upload into the object store and commits
//! it as a document version.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use docstore_entity::job::model::Job;
use docstore_entity::job::payload::{IngestPayload, IngestResult};
use docstore_service::document::{StoredUpload, VersionEngine};
use docstore_storage::key::ingest_key;

use crate::executor::{JobExecutionError, JobHandler};
use crate::queue::JobQueue;

/// Progress once the payload has been read.
const PROGRESS_STARTED: i32 = 10;
/// Progress after the content is in the object store.
const PROGRESS_STORED: i32 = 30;
/// Progress after the spool file is cleaned up.
const PROGRESS_CLEANED: i32 = 60;

/// Handles `document_ingest` jobs.
///
/// Every step tolerates running again after a crash: the object key is
/// derived from the job id, a missing spool file with a present object
/// means the transfer already happened, and the commit replays an earlier
/// version that references the same key.
#[derive(Debug)]
pub struct IngestJobHandler {
    engine: VersionEngine,
    queue: Arc<JobQueue>,
}

impl IngestJobHandler {
    /// Creates a new ingestion handler.
    pub fn new(engine: VersionEngine, queue: Arc<JobQueue>) -> Self {
        Self { engine, queue }
    }

    /// Record progress; `false` once the job belongs to another worker.
    async fn report(&self, job: &Job, percent: i32) -> bool {
        match self.queue.progress(job, percent).await {
            Ok(owned) => owned,
            Err(e) => {
                warn!(job_id = %job.id, percent, error = %e, "Failed to record job progress");
                true
            }
        }
    }

    /// Put the spooled file at `key`, or confirm an earlier attempt did.
    async fn transfer(
        &self,
        key: &str,
        temp_path: &Path,
        declared_size: i64,
    ) -> Result<i64, JobExecutionError> {
        let store = self.engine.store();
        match store.put_file(key, temp_path).await {
            Ok(written) => Ok(i64::try_from(written).unwrap_or(i64::MAX)),
            Err(e) if e.is_not_found() => {
                if store.exists(key).await? {
                    debug!(key, "Spool file already consumed; content is stored");
                    Ok(declared_size)
                } else {
                    Err(JobExecutionError::Permanent(format!(
                        "Spooled upload {} is gone and was never stored",
                        temp_path.display()
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobHandler for IngestJobHandler {
    fn job_type(&self) -> &str {
        IngestPayload::JOB_TYPE
    }

    async fn execute(&self, job: &Job) -> Result<Value, JobExecutionError> {
        let payload: IngestPayload = job.payload_as().map_err(|e| {
            JobExecutionError::Permanent(format!("Malformed ingest payload: {e}"))
        })?;
        self.report(job, PROGRESS_STARTED).await;

        let key = ingest_key(payload.collection_id, job.id, &payload.file_name);
        let temp_path = Path::new(&payload.temp_path);
        let size_bytes = self.transfer(&key, temp_path, payload.size_bytes).await?;
        self.report(job, PROGRESS_STORED).await;

        match tokio::fs::remove_file(temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %temp_path.display(), error = %e, "Failed to remove spool file");
            }
        }
        if !self.report(job, PROGRESS_CLEANED).await {
            return Err(JobExecutionError::Transient(format!(
                "Job {} was handed to another worker before commit",
                job.id
            )));
        }

        let committed = self
            .engine
            .commit_upload(
                &payload.target,
                &StoredUpload {
                    object_key: key,
                    file_name: payload.file_name.clone(),
                    mime_type: payload.mime_type,
                    size_bytes,
                    changelog: payload.changelog,
                    principal_id: payload.principal_id,
                },
            )
            .await?;

        info!(
            job_id = %job.id,
            document_id = %committed.document.id,
            version = committed.version.version_number,
            replayed = committed.replayed,
            "Ingested upload"
        );

        let result = IngestResult {
            document_id: committed.document.id,
            version_number: committed.version.version_number,
            file_name: payload.file_name,
            file_size: committed.version.size_bytes,
        };
        serde_json::to_value(result)
            .map_err(|e| JobExecutionError::Permanent(format!("Unserializable ingest result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::traits::storage::ObjectStore;
    use docstore_core::types::id::{NodeId, PrincipalId};
    use docstore_database::memory::{MemoryDocumentRepository, MemoryJobRepository};
    use docstore_entity::job::payload::IngestTarget;
    use docstore_entity::job::status::JobStatus;
    use docstore_storage::LocalObjectStore;

    use crate::queue::{JobCreateParams, RetryPolicy};

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<LocalObjectStore>,
        queue: Arc<JobQueue>,
        handler: IngestJobHandler,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            LocalObjectStore::new(dir.path().join("objects"))
                .await
                .unwrap(),
        );
        let queue = Arc::new(JobQueue::new(
            Arc::new(MemoryJobRepository::new()),
            RetryPolicy::default(),
        ));
        let engine = VersionEngine::new(
            Arc::new(MemoryDocumentRepository::new()),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
        );
        let handler = IngestJobHandler::new(engine, Arc::clone(&queue));
        Fixture {
            dir,
            store,
            queue,
            handler,
        }
    }

    async fn claim(f: &Fixture, temp_path: &Path, node_id: NodeId) -> Job {
        let payload = IngestPayload {
            temp_path: temp_path.to_string_lossy().into_owned(),
            file_name: "drawing.dwg".to_string(),
            mime_type: "application/acad".to_string(),
            size_bytes: 11,
            target: IngestTarget::NewDocument {
                node_id,
                title: "drawing".to_string(),
            },
            collection_id: node_id,
            changelog: None,
            principal_id: PrincipalId::new(),
        };
        f.queue
            .enqueue(JobCreateParams {
                job_type: IngestPayload::JOB_TYPE.to_string(),
                queue: IngestPayload::QUEUE.to_string(),
                payload: serde_json::to_value(&payload).unwrap(),
                max_attempts: None,
                run_at: None,
                created_by: None,
            })
            .await
            .unwrap();
        f.queue
            .dequeue(&[IngestPayload::QUEUE.to_string()], "w")
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_stores_and_commits() {
        let f = fixture().await;
        let temp_path = f.dir.path().join("spool.bin");
        tokio::fs::write(&temp_path, b"hello world").await.unwrap();
        let node_id = NodeId::new();
        let job = claim(&f, &temp_path, node_id).await;

        let value = f.handler.execute(&job).await.unwrap();
        let result: IngestResult = serde_json::from_value(value).unwrap();

        assert_eq!(result.version_number, 1);
        assert_eq!(result.file_size, 11);
        assert!(!temp_path.exists());
        let key = ingest_key(node_id, job.id, "drawing.dwg");
        assert!(f.store.exists(&key).await.unwrap());
        let view = f.queue.status(job.id).await.unwrap();
        assert_eq!(view.state, JobStatus::Active);
        assert_eq!(view.progress, PROGRESS_CLEANED);
    }

    #[tokio::test]
    async fn test_rerun_after_commit_replays() {
        let f = fixture().await;
        let temp_path = f.dir.path().join("spool.bin");
        tokio::fs::write(&temp_path, b"hello world").await.unwrap();
        let job = claim(&f, &temp_path, NodeId::new()).await;

        let first: IngestResult =
            serde_json::from_value(f.handler.execute(&job).await.unwrap()).unwrap();
        let second: IngestResult =
            serde_json::from_value(f.handler.execute(&job).await.unwrap()).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_spool_without_object_is_permanent() {
        let f = fixture().await;
        let temp_path = f.dir.path().join("never-written.bin");
        let job = claim(&f, &temp_path, NodeId::new()).await;

        let err = f.handler.execute(&job).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_permanent() {
        let f = fixture().await;
        let temp_path = f.dir.path().join("spool.bin");
        let mut job = claim(&f, &temp_path, NodeId::new()).await;
        job.payload = serde_json::json!({ "unexpected": true });

        let err = f.handler.execute(&job).await.unwrap_err();
        assert!(matches!(err, JobExecutionError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_job_taken_over_does_not_commit() {
        let f = fixture().await;
        let temp_path = f.dir.path().join("spool.bin");
        tokio::fs::write(&temp_path, b"hello world").await.unwrap();
        let node_id = NodeId::new();
        let job = claim(&f, &temp_path, node_id).await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        f.queue.recover_stale(std::time::Duration::from_millis(5)).await.unwrap();
        let takeover = f
            .queue
            .dequeue(&[IngestPayload::QUEUE.to_string()], "w2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(takeover.id, job.id);

        let err = f.handler.execute(&job).await.unwrap_err();
        assert!(err.is_retryable());
        let key = ingest_key(node_id, job.id, "drawing.dwg");
        let committed = f
            .handler
            .engine
            .documents()
            .find_version_by_object_key(&key)
            .await
            .unwrap();
        assert!(committed.is_none());
    }
}
