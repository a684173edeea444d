//! Version engine: commits uploads, reverts, and deletes documents.
//!
//! State is the version rows plus each document's `current_version`
//! pointer. Versions are never edited; every content change appends one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use docstore_core::error::{AppError, ErrorKind};
use docstore_core::result::AppResult;
use docstore_core::traits::storage::ObjectStore;
use docstore_core::types::id::{DocumentId, PrincipalId, VersionId};
use docstore_database::repositories::DocumentRepository;
use docstore_entity::document::{
    Document, DocumentWithVersion, NewDocument, NewVersion, Version,
};
use docstore_entity::job::payload::IngestTarget;
use docstore_storage::key::sibling_key;

use crate::context::RequestContext;

/// Attempts at a metadata commit before a lost race is reported.
const MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Content already written to the object store, waiting to be recorded.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    /// Key the content was stored under.
    pub object_key: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Stored size in bytes.
    pub size_bytes: i64,
    /// Optional description of the change.
    pub changelog: Option<String>,
    /// Principal recorded as the creator.
    pub principal_id: PrincipalId,
}

/// Outcome of [`VersionEngine::commit_upload`].
#[derive(Debug, Clone)]
pub struct CommittedUpload {
    /// The document as of the commit.
    pub document: Document,
    /// The version that references the upload.
    pub version: Version,
    /// Whether an earlier attempt had already committed this upload.
    pub replayed: bool,
}

/// Governs each document's version lineage.
#[derive(Clone)]
pub struct VersionEngine {
    documents: Arc<dyn DocumentRepository>,
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for VersionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionEngine")
            .field("backend", &self.store.backend())
            .finish()
    }
}

impl VersionEngine {
    /// Creates a new version engine.
    pub fn new(documents: Arc<dyn DocumentRepository>, store: Arc<dyn ObjectStore>) -> Self {
        Self { documents, store }
    }

    /// Document repository the engine commits to.
    pub fn documents(&self) -> &Arc<dyn DocumentRepository> {
        &self.documents
    }

    /// Object store holding version content.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Fetch a document with its newest version.
    pub async fn get_document(&self, document_id: DocumentId) -> AppResult<DocumentWithVersion> {
        let document = self.require_document(document_id).await?;
        let latest_version = self
            .documents
            .find_version_by_number(document_id, document.current_version)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("Document {document_id} has no committed version"))
            })?;
        Ok(DocumentWithVersion {
            document,
            latest_version,
        })
    }

    /// List a document's versions, newest first.
    pub async fn get_history(&self, document_id: DocumentId) -> AppResult<Vec<Version>> {
        self.require_document(document_id).await?;
        self.documents.list_versions(document_id).await
    }

    /// Record stored content as a new document or a new version.
    ///
    /// If a version already references `upload.object_key`, that earlier
    /// commit is returned instead of creating a second one.
    pub async fn commit_upload(
        &self,
        target: &IngestTarget,
        upload: &StoredUpload,
    ) -> AppResult<CommittedUpload> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(existing) = self.replayed_commit(target, &upload.object_key).await? {
                return Ok(existing);
            }

            let result = match target {
                IngestTarget::NewDocument { node_id, title } => {
                    let document = NewDocument {
                        node_id: *node_id,
                        title: title.clone(),
                        created_by: upload.principal_id,
                    };
                    let version = new_version(title.clone(), upload);
                    self.documents.create_document(&document, &version).await
                }
                IngestTarget::NewVersion { document_id, title } => {
                    let current = self.require_document(*document_id).await?;
                    let title = title.clone().unwrap_or(current.title);
                    let version = new_version(title, upload);
                    self.documents.append_version(*document_id, &version).await
                }
            };

            match result {
                Ok(committed) => {
                    info!(
                        document_id = %committed.document.id,
                        version = committed.latest_version.version_number,
                        key = %committed.latest_version.object_key,
                        "Committed upload"
                    );
                    return Ok(CommittedUpload {
                        document: committed.document,
                        version: committed.latest_version,
                        replayed: false,
                    });
                }
                Err(e) if lost_race(&e, attempt) => {
                    debug!(attempt, error = %e, "Commit lost a race, re-reading");
                    backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Create a new version whose content duplicates `target_version_id`.
    ///
    /// The content is copied to a fresh key first, so no two versions ever
    /// share an object. Reverting to the current version is allowed and
    /// still appends a version.
    pub async fn revert(
        &self,
        ctx: &RequestContext,
        document_id: DocumentId,
        target_version_id: VersionId,
    ) -> AppResult<DocumentWithVersion> {
        let target = self
            .documents
            .find_version(target_version_id)
            .await?
            .filter(|v| v.document_id == document_id)
            .ok_or_else(|| {
                AppError::not_found(format!(
                    "Version {target_version_id} not found for document {document_id}"
                ))
            })?;

        let new_key = sibling_key(&target.object_key);
        self.store.copy(&target.object_key, &new_key).await?;

        let version = target.revert_copy(new_key.clone(), ctx.principal_id);
        let mut attempt = 0;
        let committed = loop {
            attempt += 1;
            match self.documents.append_version(document_id, &version).await {
                Ok(committed) => break committed,
                Err(e) if lost_race(&e, attempt) => {
                    debug!(attempt, error = %e, "Revert lost a race, re-reading");
                    backoff(attempt).await;
                }
                Err(e) => {
                    if let Err(cleanup) = self.store.delete(&new_key).await {
                        warn!(key = %new_key, error = %cleanup, "Failed to remove unused revert copy");
                    }
                    return Err(e);
                }
            }
        };

        info!(
            principal_id = %ctx.principal_id,
            document_id = %document_id,
            reverted_to = target.version_number,
            version = committed.latest_version.version_number,
            "Document reverted"
        );
        Ok(committed)
    }

    /// Delete a document, its versions, and as much of their content as
    /// can be removed.
    ///
    /// Object deletion failures are logged and do not block the metadata
    /// delete.
    pub async fn delete(&self, ctx: &RequestContext, document_id: DocumentId) -> AppResult<()> {
        self.require_document(document_id).await?;
        let versions = self.documents.list_versions(document_id).await?;

        for version in &versions {
            if let Err(e) = self.store.delete(&version.object_key).await {
                warn!(
                    document_id = %document_id,
                    key = %version.object_key,
                    error = %e,
                    "Failed to delete version content"
                );
            }
        }

        if !self.documents.delete_document(document_id).await? {
            return Err(AppError::not_found(format!("Document {document_id} not found")));
        }

        info!(
            principal_id = %ctx.principal_id,
            document_id = %document_id,
            versions = versions.len(),
            "Document deleted"
        );
        Ok(())
    }

    async fn require_document(&self, document_id: DocumentId) -> AppResult<Document> {
        self.documents
            .find_document(document_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Document {document_id} not found")))
    }

    async fn replayed_commit(
        &self,
        target: &IngestTarget,
        object_key: &str,
    ) -> AppResult<Option<CommittedUpload>> {
        let Some(version) = self.documents.find_version_by_object_key(object_key).await? else {
            return Ok(None);
        };
        if let IngestTarget::NewVersion { document_id, .. } = target {
            if version.document_id != *document_id {
                return Err(AppError::conflict(format!(
                    "Object {object_key} is already committed to document {}",
                    version.document_id
                )));
            }
        }
        let document = self.require_document(version.document_id).await?;
        debug!(document_id = %document.id, key = object_key, "Upload already committed");
        Ok(Some(CommittedUpload {
            document,
            version,
            replayed: true,
        }))
    }
}

fn new_version(title: String, upload: &StoredUpload) -> NewVersion {
    NewVersion {
        title,
        changelog: upload.changelog.clone(),
        object_key: upload.object_key.clone(),
        file_name: upload.file_name.clone(),
        mime_type: upload.mime_type.clone(),
        size_bytes: upload.size_bytes,
        created_by: upload.principal_id,
    }
}

fn lost_race(err: &AppError, attempt: u32) -> bool {
    err.kind == ErrorKind::Transaction && attempt < MAX_COMMIT_ATTEMPTS
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use tempfile::TempDir;

    use docstore_core::types::id::NodeId;
    use docstore_database::memory::MemoryDocumentRepository;
    use docstore_storage::providers::LocalObjectStore;

    use super::*;

    struct Fixture {
        _dir: TempDir,
        engine: VersionEngine,
        store: Arc<dyn ObjectStore>,
        principal: PrincipalId,
    }

    async fn fixture_with(documents: Arc<dyn DocumentRepository>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()).await.unwrap());
        Fixture {
            engine: VersionEngine::new(documents, store.clone()),
            store,
            principal: PrincipalId::new(),
            _dir: dir,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryDocumentRepository::new())).await
    }

    impl Fixture {
        async fn stored(&self, key: &str, content: &'static [u8]) -> StoredUpload {
            let body = futures::stream::iter(vec![Ok(Bytes::from_static(content))]).boxed();
            let size = self.store.put(key, body).await.unwrap();
            StoredUpload {
                object_key: key.to_string(),
                file_name: "manual.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                size_bytes: size as i64,
                changelog: None,
                principal_id: self.principal,
            }
        }

        async fn first_upload(&self, key: &str, content: &'static [u8]) -> CommittedUpload {
            let target = IngestTarget::NewDocument {
                node_id: NodeId::new(),
                title: "Quality Manual".to_string(),
            };
            let upload = self.stored(key, content).await;
            self.engine.commit_upload(&target, &upload).await.unwrap()
        }

        async fn read(&self, key: &str) -> Vec<u8> {
            let mut stream = self.store.get_stream(key).await.unwrap();
            let mut out = Vec::new();
            while let Some(chunk) = stream.next().await {
                out.extend_from_slice(&chunk.unwrap());
            }
            out
        }
    }

    fn append_target(document_id: DocumentId) -> IngestTarget {
        IngestTarget::NewVersion {
            document_id,
            title: None,
        }
    }

    #[tokio::test]
    async fn test_first_upload_then_new_version() {
        let fx = fixture().await;
        let first = fx.first_upload("documents/c/1.pdf", b"v1").await;
        assert_eq!(first.document.current_version, 1);
        assert_eq!(first.version.version_number, 1);
        assert!(!first.replayed);

        let mut upload = fx.stored("documents/c/2.pdf", b"v2").await;
        upload.changelog = Some("Fixed typo".to_string());
        let second = fx
            .engine
            .commit_upload(&append_target(first.document.id), &upload)
            .await
            .unwrap();
        assert_eq!(second.document.current_version, 2);
        assert_eq!(second.version.changelog.as_deref(), Some("Fixed typo"));
        assert_eq!(second.document.title, "Quality Manual");

        let history = fx.engine.get_history(first.document.id).await.unwrap();
        let numbers: Vec<i32> = history.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_commit_upload_replays_existing_key() {
        let fx = fixture().await;
        let first = fx.first_upload("documents/c/1.pdf", b"v1").await;
        let upload = fx.stored("documents/c/2.pdf", b"v2").await;

        let target = append_target(first.document.id);
        let once = fx.engine.commit_upload(&target, &upload).await.unwrap();
        let twice = fx.engine.commit_upload(&target, &upload).await.unwrap();

        assert!(twice.replayed);
        assert_eq!(twice.version.id, once.version.id);
        let history = fx.engine.get_history(first.document.id).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_replay_into_other_document_is_conflict() {
        let fx = fixture().await;
        let first = fx.first_upload("documents/c/1.pdf", b"v1").await;
        let other = fx.first_upload("documents/c/2.pdf", b"v2").await;

        let upload = fx.stored("documents/c/1.pdf", b"v1").await;
        let err = fx
            .engine
            .commit_upload(&append_target(other.document.id), &upload)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
        let history = fx.engine.get_history(first.document.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_append_to_unknown_document_is_not_found() {
        let fx = fixture().await;
        let upload = fx.stored("documents/c/x.pdf", b"x").await;
        let err = fx
            .engine
            .commit_upload(&append_target(DocumentId::new()), &upload)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_revert_copies_content_to_fresh_key() {
        let fx = fixture().await;
        let first = fx.first_upload("documents/c/1.pdf", b"original").await;
        let upload = fx.stored("documents/c/2.pdf", b"changed").await;
        fx.engine
            .commit_upload(&append_target(first.document.id), &upload)
            .await
            .unwrap();

        let actor = PrincipalId::new();
        let reverted = fx
            .engine
            .revert(&RequestContext::new(actor), first.document.id, first.version.id)
            .await
            .unwrap();

        assert_eq!(reverted.document.current_version, 3);
        assert_eq!(reverted.document.updated_by, actor);
        let newest = &reverted.latest_version;
        assert_eq!(newest.version_number, 3);
        assert_eq!(newest.changelog.as_deref(), Some("Reverted to version 1"));
        assert_eq!(newest.created_by, actor);
        assert_ne!(newest.object_key, first.version.object_key);
        assert_eq!(fx.read(&newest.object_key).await, b"original");

        let history = fx.engine.get_history(first.document.id).await.unwrap();
        assert_eq!(history.len(), 3);
        let untouched = history.iter().find(|v| v.id == first.version.id).unwrap();
        assert_eq!(untouched.object_key, first.version.object_key);
        assert_eq!(fx.read(&untouched.object_key).await, b"original");
    }

    #[tokio::test]
    async fn test_revert_to_current_version_still_appends() {
        let fx = fixture().await;
        let first = fx.first_upload("documents/c/1.pdf", b"only").await;

        let reverted = fx
            .engine
            .revert(
                &RequestContext::new(fx.principal),
                first.document.id,
                first.version.id,
            )
            .await
            .unwrap();
        assert_eq!(reverted.document.current_version, 2);
        assert!(reverted.is_consistent());
    }

    #[tokio::test]
    async fn test_revert_rejects_version_of_other_document() {
        let fx = fixture().await;
        let a = fx.first_upload("documents/c/a.pdf", b"a").await;
        let b = fx.first_upload("documents/c/b.pdf", b"b").await;

        let err = fx
            .engine
            .revert(&RequestContext::new(fx.principal), a.document.id, b.version.id)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fx.engine.get_history(a.document.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_get_distinct_numbers() {
        let fx = fixture().await;
        let first = fx.first_upload("documents/c/0.pdf", b"v1").await;

        let mut handles = Vec::new();
        for i in 0..12 {
            let engine = fx.engine.clone();
            let upload = fx.stored(&format!("documents/c/{}.pdf", i + 1), b"next").await;
            let target = append_target(first.document.id);
            handles.push(tokio::spawn(async move {
                engine.commit_upload(&target, &upload).await
            }));
        }

        let mut numbers = HashSet::new();
        for handle in handles {
            let committed = handle.await.unwrap().unwrap();
            assert!(numbers.insert(committed.version.version_number));
        }
        assert_eq!(numbers.len(), 12);

        let current = fx.engine.get_document(first.document.id).await.unwrap();
        assert_eq!(current.document.current_version, 13);
        assert!(current.is_consistent());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_objects() {
        let fx = fixture().await;
        let first = fx.first_upload("documents/c/1.pdf", b"v1").await;
        let upload = fx.stored("documents/c/2.pdf", b"v2").await;
        fx.engine
            .commit_upload(&append_target(first.document.id), &upload)
            .await
            .unwrap();
        fx.store.delete("documents/c/1.pdf").await.unwrap();

        fx.engine
            .delete(&RequestContext::new(fx.principal), first.document.id)
            .await
            .unwrap();

        assert!(!fx.store.exists("documents/c/2.pdf").await.unwrap());
        let err = fx.engine.get_history(first.document.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    /// Reports a lost race on the first `failures` appends.
    #[derive(Debug)]
    struct ContendedRepository {
        inner: MemoryDocumentRepository,
        failures: AtomicU32,
    }

    #[async_trait]
    impl DocumentRepository for ContendedRepository {
        async fn find_document(&self, id: DocumentId) -> AppResult<Option<Document>> {
            self.inner.find_document(id).await
        }

        async fn find_version(&self, id: VersionId) -> AppResult<Option<Version>> {
            self.inner.find_version(id).await
        }

        async fn find_version_by_number(
            &self,
            document_id: DocumentId,
            version_number: i32,
        ) -> AppResult<Option<Version>> {
            self.inner
                .find_version_by_number(document_id, version_number)
                .await
        }

        async fn find_version_by_object_key(&self, key: &str) -> AppResult<Option<Version>> {
            self.inner.find_version_by_object_key(key).await
        }

        async fn list_versions(&self, document_id: DocumentId) -> AppResult<Vec<Version>> {
            self.inner.list_versions(document_id).await
        }

        async fn create_document(
            &self,
            document: &NewDocument,
            version: &NewVersion,
        ) -> AppResult<DocumentWithVersion> {
            self.inner.create_document(document, version).await
        }

        async fn append_version(
            &self,
            document_id: DocumentId,
            version: &NewVersion,
        ) -> AppResult<DocumentWithVersion> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::transaction("could not serialize access"));
            }
            self.inner.append_version(document_id, version).await
        }

        async fn delete_document(&self, id: DocumentId) -> AppResult<bool> {
            self.inner.delete_document(id).await
        }

        async fn health_check(&self) -> AppResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_lost_races_are_retried() {
        let repo = Arc::new(ContendedRepository {
            inner: MemoryDocumentRepository::new(),
            failures: AtomicU32::new(0),
        });
        let fx = fixture_with(repo.clone()).await;
        let first = fx.first_upload("documents/c/1.pdf", b"v1").await;

        repo.failures.store(2, Ordering::SeqCst);
        let reverted = fx
            .engine
            .revert(
                &RequestContext::new(fx.principal),
                first.document.id,
                first.version.id,
            )
            .await
            .unwrap();
        assert_eq!(reverted.document.current_version, 2);

        repo.failures.store(MAX_COMMIT_ATTEMPTS, Ordering::SeqCst);
        let err = fx
            .engine
            .revert(
                &RequestContext::new(fx.principal),
                first.document.id,
                first.version.id,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transaction);
        assert_eq!(fx.engine.get_history(first.document.id).await.unwrap().len(), 2);
    }
}
