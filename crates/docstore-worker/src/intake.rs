//! Upload intake: validates a spooled upload and enqueues its ingestion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use validator::{Validate, ValidationError};

use docstore_core::error::AppError;
use docstore_core::result::AppResult;
use docstore_core::types::id::{DocumentId, JobId, NodeId};
use docstore_database::repositories::{DocumentRepository, NodeDirectory};
use docstore_entity::job::payload::{IngestPayload, IngestTarget};
use docstore_service::context::RequestContext;

use crate::queue::{JobCreateParams, JobQueue, JobStatusView};

/// An upload that has been spooled to local disk.
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_target"))]
pub struct IngestRequest {
    /// Spool file holding the upload body.
    pub temp_path: PathBuf,
    /// Original file name.
    #[validate(length(min = 1, max = 255, message = "File name must be 1-255 characters"))]
    pub file_name: String,
    /// Declared MIME type.
    #[validate(length(min = 1, max = 255, message = "MIME type must be 1-255 characters"))]
    pub mime_type: String,
    /// Size of the spooled body in bytes.
    pub size_bytes: u64,
    /// Existing document to append a version to.
    pub document_id: Option<DocumentId>,
    /// Node to create a new document under.
    pub node_id: Option<NodeId>,
    /// Title; defaults to the file name without its extension.
    #[validate(length(min = 1, max = 500, message = "Title must be 1-500 characters"))]
    pub title: Option<String>,
    /// Optional description of the change.
    #[validate(length(max = 4000, message = "Changelog must be at most 4000 characters"))]
    pub changelog: Option<String>,
}

fn validate_target(req: &IngestRequest) -> Result<(), ValidationError> {
    match (req.document_id, req.node_id) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(ValidationError::new("target")
            .with_message("Exactly one of document_id or node_id is required".into())),
    }
}

/// Default title for a file: its name without the extension.
fn default_title(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(file_name)
        .to_string()
}

/// Accepts uploads and hands them to the ingestion queue.
#[derive(Debug, Clone)]
pub struct IngestionService {
    queue: Arc<JobQueue>,
    documents: Arc<dyn DocumentRepository>,
    nodes: Arc<dyn NodeDirectory>,
    max_upload_size: u64,
}

impl IngestionService {
    /// Creates a new ingestion service.
    pub fn new(
        queue: Arc<JobQueue>,
        documents: Arc<dyn DocumentRepository>,
        nodes: Arc<dyn NodeDirectory>,
        max_upload_size: u64,
    ) -> Self {
        Self {
            queue,
            documents,
            nodes,
            max_upload_size,
        }
    }

    /// Largest accepted upload in bytes.
    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    /// Validate the upload and enqueue an ingestion job for it.
    ///
    /// Nothing is persisted when validation fails. The spooled file stays
    /// owned by the caller until this returns `Ok`.
    pub async fn enqueue(&self, ctx: &RequestContext, req: IngestRequest) -> AppResult<JobId> {
        req.validate()?;

        if req.size_bytes > self.max_upload_size {
            return Err(AppError::validation(format!(
                "Upload of {} bytes exceeds the limit of {} bytes",
                req.size_bytes, self.max_upload_size
            )));
        }

        if !tokio::fs::try_exists(&req.temp_path).await.unwrap_or(false) {
            return Err(AppError::validation(format!(
                "Spooled upload {} does not exist",
                req.temp_path.display()
            )));
        }

        let (target, collection_id) = match (req.document_id, req.node_id) {
            (Some(document_id), _) => {
                let document = self
                    .documents
                    .find_document(document_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::not_found(format!("Document {document_id} not found"))
                    })?;
                let collection_id = self.nodes.resolve_collection(document.node_id).await?;
                let target = IngestTarget::NewVersion {
                    document_id,
                    title: req.title.clone(),
                };
                (target, collection_id)
            }
            (None, Some(node_id)) => {
                let collection_id = self.nodes.resolve_collection(node_id).await?;
                let title = req
                    .title
                    .clone()
                    .unwrap_or_else(|| default_title(&req.file_name));
                (IngestTarget::NewDocument { node_id, title }, collection_id)
            }
            (None, None) => {
                return Err(AppError::validation(
                    "Exactly one of document_id or node_id is required",
                ));
            }
        };

        let payload = IngestPayload {
            temp_path: req.temp_path.to_string_lossy().into_owned(),
            file_name: req.file_name,
            mime_type: req.mime_type,
            size_bytes: i64::try_from(req.size_bytes)
                .map_err(|_| AppError::validation("Upload size out of range"))?,
            target,
            collection_id,
            changelog: req.changelog,
            principal_id: ctx.principal_id,
        };

        let job = self
            .queue
            .enqueue(JobCreateParams {
                job_type: IngestPayload::JOB_TYPE.to_string(),
                queue: IngestPayload::QUEUE.to_string(),
                payload: serde_json::to_value(&payload)?,
                max_attempts: None,
                run_at: None,
                created_by: Some(ctx.principal_id),
            })
            .await?;

        info!(
            job_id = %job.id,
            file_name = %payload.file_name,
            size = payload.size_bytes,
            principal = %ctx.principal_id,
            "Accepted upload for ingestion"
        );
        Ok(job.id)
    }

    /// Status of an ingestion job.
    pub async fn status(&self, job_id: JobId) -> AppResult<JobStatusView> {
        self.queue.status(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::error::ErrorKind;
    use docstore_core::types::id::PrincipalId;
    use docstore_database::memory::{
        MemoryDocumentRepository, MemoryJobRepository, MemoryNodeDirectory,
    };
    use docstore_entity::job::status::JobStatus;

    use crate::queue::RetryPolicy;

    struct Fixture {
        _dir: tempfile::TempDir,
        temp_path: PathBuf,
        intake: IngestionService,
        queue: Arc<JobQueue>,
        collection: NodeId,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("upload.partial");
        tokio::fs::write(&temp_path, b"hello").await.unwrap();

        let nodes = MemoryNodeDirectory::new();
        let collection = nodes.add_collection("engineering").await;
        let queue = Arc::new(JobQueue::new(
            Arc::new(MemoryJobRepository::new()),
            RetryPolicy::default(),
        ));
        let intake = IngestionService::new(
            Arc::clone(&queue),
            Arc::new(MemoryDocumentRepository::new()),
            Arc::new(nodes),
            1024,
        );
        Fixture {
            _dir: dir,
            temp_path,
            intake,
            queue,
            collection,
        }
    }

    fn request(temp_path: &Path) -> IngestRequest {
        IngestRequest {
            temp_path: temp_path.to_path_buf(),
            file_name: "manual.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 5,
            document_id: None,
            node_id: None,
            title: None,
            changelog: None,
        }
    }

    #[test]
    fn test_default_title_strips_extension() {
        assert_eq!(default_title("manual.pdf"), "manual");
        assert_eq!(default_title("archive.tar.gz"), "archive.tar");
        assert_eq!(default_title("README"), "README");
    }

    #[tokio::test]
    async fn test_enqueue_new_document() {
        let f = fixture().await;
        let ctx = RequestContext::new(PrincipalId::new());
        let mut req = request(&f.temp_path);
        req.node_id = Some(f.collection);

        let job_id = f.intake.enqueue(&ctx, req).await.unwrap();

        let view = f.intake.status(job_id).await.unwrap();
        assert_eq!(view.state, JobStatus::Pending);
        let job = f
            .queue
            .dequeue(&[IngestPayload::QUEUE.to_string()], "w")
            .await
            .unwrap()
            .unwrap();
        let payload: IngestPayload = job.payload_as().unwrap();
        assert_eq!(payload.collection_id, f.collection);
        assert_eq!(payload.principal_id, ctx.principal_id);
        assert_eq!(
            payload.target,
            IngestTarget::NewDocument {
                node_id: f.collection,
                title: "manual".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_rejects_both_or_neither_target() {
        let f = fixture().await;
        let ctx = RequestContext::new(PrincipalId::new());

        let err = f.intake.enqueue(&ctx, request(&f.temp_path)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let mut req = request(&f.temp_path);
        req.node_id = Some(f.collection);
        req.document_id = Some(DocumentId::new());
        let err = f.intake.enqueue(&ctx, req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        assert_eq!(f.queue.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_blank_uploads() {
        let f = fixture().await;
        let ctx = RequestContext::new(PrincipalId::new());

        let mut req = request(&f.temp_path);
        req.node_id = Some(f.collection);
        req.size_bytes = 4096;
        let err = f.intake.enqueue(&ctx, req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let mut req = request(&f.temp_path);
        req.node_id = Some(f.collection);
        req.file_name = String::new();
        let err = f.intake.enqueue(&ctx, req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        assert_eq!(f.queue.stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_unknown_targets_are_not_found() {
        let f = fixture().await;
        let ctx = RequestContext::new(PrincipalId::new());

        let mut req = request(&f.temp_path);
        req.document_id = Some(DocumentId::new());
        assert!(f.intake.enqueue(&ctx, req).await.unwrap_err().is_not_found());

        let mut req = request(&f.temp_path);
        req.node_id = Some(NodeId::new());
        assert!(f.intake.enqueue(&ctx, req).await.unwrap_err().is_not_found());

        assert_eq!(f.queue.stats().await.unwrap().pending, 0);
    }
}
