//! Document download service. Streams stored content without buffering it.

use std::sync::Arc;

use tracing::debug;

use docstore_core::error::AppError;
use docstore_core::result::AppResult;
use docstore_core::traits::storage::{ByteStream, ObjectStore};
use docstore_core::types::id::DocumentId;
use docstore_database::repositories::DocumentRepository;
use docstore_entity::document::Version;
use docstore_storage::tracked::TrackedStream;

/// Streams version content out of the object store.
#[derive(Clone)]
pub struct DownloadService {
    /// Document repository.
    documents: Arc<dyn DocumentRepository>,
    /// Object store.
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for DownloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadService").finish()
    }
}

/// An open download: metadata for the response headers plus the body.
pub struct Download {
    /// The version being delivered.
    pub version: Version,
    /// MIME type for Content-Type header.
    pub content_type: String,
    /// Suggested filename for Content-Disposition.
    pub file_name: String,
    /// Size in bytes for Content-Length.
    pub size_bytes: u64,
    /// Content, read lazily from the store.
    pub stream: ByteStream,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("version", &self.version.id)
            .field("content_type", &self.content_type)
            .field("file_name", &self.file_name)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

impl DownloadService {
    /// Creates a new download service.
    pub fn new(documents: Arc<dyn DocumentRepository>, store: Arc<dyn ObjectStore>) -> Self {
        Self { documents, store }
    }

    /// Open the newest version of a document.
    pub async fn download(&self, document_id: DocumentId) -> AppResult<Download> {
        let document = self
            .documents
            .find_document(document_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Document {document_id} not found")))?;
        self.download_version(document_id, document.current_version)
            .await
    }

    /// Open a specific version of a document.
    pub async fn download_version(
        &self,
        document_id: DocumentId,
        version_number: i32,
    ) -> AppResult<Download> {
        let version = self
            .documents
            .find_version_by_number(document_id, version_number)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!(
                    "Version {version_number} of document {document_id} not found"
                ))
            })?;

        let stream = self.store.get_stream(&version.object_key).await?;
        debug!(
            document_id = %document_id,
            version = version_number,
            key = %version.object_key,
            "Opened download"
        );

        Ok(Download {
            content_type: version.mime_type.clone(),
            file_name: version.file_name.clone(),
            size_bytes: u64::try_from(version.size_bytes).unwrap_or(0),
            stream: TrackedStream::new(version.object_key.clone(), stream).into_byte_stream(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::StreamExt;

    use docstore_core::types::id::{NodeId, PrincipalId};
    use docstore_database::memory::MemoryDocumentRepository;
    use docstore_entity::document::{NewDocument, NewVersion};
    use docstore_storage::providers::LocalObjectStore;

    use super::*;

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_download_latest_and_historical() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()).await.unwrap());
        let documents = Arc::new(MemoryDocumentRepository::new());
        let principal = PrincipalId::new();

        let content: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let body = futures::stream::iter(vec![Ok(Bytes::from(content.clone()))]).boxed();
        store.put("documents/c/1.bin", body).await.unwrap();
        let body = futures::stream::iter(vec![Ok(Bytes::from_static(b"second"))]).boxed();
        store.put("documents/c/2.bin", body).await.unwrap();

        let version = |key: &str, size: i64| NewVersion {
            title: "Data".to_string(),
            changelog: None,
            object_key: key.to_string(),
            file_name: "data.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            size_bytes: size,
            created_by: principal,
        };
        let created = documents
            .create_document(
                &NewDocument {
                    node_id: NodeId::new(),
                    title: "Data".to_string(),
                    created_by: principal,
                },
                &version("documents/c/1.bin", content.len() as i64),
            )
            .await
            .unwrap();
        let id = created.document.id;
        documents
            .append_version(id, &version("documents/c/2.bin", 6))
            .await
            .unwrap();

        let service = DownloadService::new(documents, store);

        let latest = service.download(id).await.unwrap();
        assert_eq!(latest.version.version_number, 2);
        assert_eq!(latest.size_bytes, 6);
        assert_eq!(collect(latest.stream).await, b"second");

        let first = service.download_version(id, 1).await.unwrap();
        assert_eq!(first.file_name, "data.bin");
        assert_eq!(first.content_type, "application/octet-stream");
        assert_eq!(collect(first.stream).await, content);

        assert!(service.download_version(id, 9).await.unwrap_err().is_not_found());
        assert!(service.download(DocumentId::new()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()).await.unwrap());
        let documents = Arc::new(MemoryDocumentRepository::new());
        let principal = PrincipalId::new();

        let created = documents
            .create_document(
                &NewDocument {
                    node_id: NodeId::new(),
                    title: "Gone".to_string(),
                    created_by: principal,
                },
                &NewVersion {
                    title: "Gone".to_string(),
                    changelog: None,
                    object_key: "documents/c/gone.pdf".to_string(),
                    file_name: "gone.pdf".to_string(),
                    mime_type: "application/pdf".to_string(),
                    size_bytes: 10,
                    created_by: principal,
                },
            )
            .await
            .unwrap();

        let service = DownloadService::new(documents, store);
        let err = service.download(created.document.id).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
