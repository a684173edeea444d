//! In-memory document repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use docstore_core::error::AppError;
use docstore_core::result::AppResult;
use docstore_core::types::id::{DocumentId, VersionId};
use docstore_entity::document::{
    Document, DocumentWithVersion, NewDocument, NewVersion, Version,
};

use crate::repositories::DocumentRepository;

#[derive(Debug, Default)]
struct InnerState {
    documents: HashMap<DocumentId, Document>,
    versions: HashMap<VersionId, Version>,
}

impl InnerState {
    fn build_version(document_id: DocumentId, version_number: i32, data: &NewVersion) -> Version {
        Version {
            id: VersionId::new(),
            document_id,
            version_number,
            title: data.title.clone(),
            changelog: data.changelog.clone(),
            object_key: data.object_key.clone(),
            file_name: data.file_name.clone(),
            mime_type: data.mime_type.clone(),
            size_bytes: data.size_bytes,
            created_by: data.created_by,
            created_at: Utc::now(),
        }
    }

    /// Enforce the same uniqueness rules as the SQL schema.
    fn check_unique(&self, candidate: &Version) -> AppResult<()> {
        let clash = self.versions.values().any(|v| {
            (v.document_id == candidate.document_id
                && v.version_number == candidate.version_number)
                || v.object_key == candidate.object_key
        });
        if clash {
            return Err(AppError::transaction(format!(
                "Version {} of document {} already exists",
                candidate.version_number, candidate.document_id
            )));
        }
        Ok(())
    }
}

/// Document repository held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentRepository {
    state: Arc<Mutex<InnerState>>,
}

impl MemoryDocumentRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn find_document(&self, id: DocumentId) -> AppResult<Option<Document>> {
        Ok(self.state.lock().await.documents.get(&id).cloned())
    }

    async fn find_version(&self, id: VersionId) -> AppResult<Option<Version>> {
        Ok(self.state.lock().await.versions.get(&id).cloned())
    }

    async fn find_version_by_number(
        &self,
        document_id: DocumentId,
        version_number: i32,
    ) -> AppResult<Option<Version>> {
        let state = self.state.lock().await;
        Ok(state
            .versions
            .values()
            .find(|v| v.document_id == document_id && v.version_number == version_number)
            .cloned())
    }

    async fn find_version_by_object_key(&self, object_key: &str) -> AppResult<Option<Version>> {
        let state = self.state.lock().await;
        Ok(state
            .versions
            .values()
            .find(|v| v.object_key == object_key)
            .cloned())
    }

    async fn list_versions(&self, document_id: DocumentId) -> AppResult<Vec<Version>> {
        let state = self.state.lock().await;
        let mut versions: Vec<Version> = state
            .versions
            .values()
            .filter(|v| v.document_id == document_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    async fn create_document(
        &self,
        document: &NewDocument,
        version: &NewVersion,
    ) -> AppResult<DocumentWithVersion> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let created = Document {
            id: DocumentId::new(),
            node_id: document.node_id,
            title: document.title.clone(),
            current_version: 1,
            created_by: document.created_by,
            created_at: now,
            updated_by: document.created_by,
            updated_at: now,
        };
        let first = InnerState::build_version(created.id, 1, version);
        state.check_unique(&first)?;

        state.documents.insert(created.id, created.clone());
        state.versions.insert(first.id, first.clone());

        Ok(DocumentWithVersion {
            document: created,
            latest_version: first,
        })
    }

    async fn append_version(
        &self,
        document_id: DocumentId,
        version: &NewVersion,
    ) -> AppResult<DocumentWithVersion> {
        let mut state = self.state.lock().await;

        let current = state
            .documents
            .get(&document_id)
            .map(|d| d.current_version)
            .ok_or_else(|| AppError::not_found(format!("Document {document_id} not found")))?;

        let appended = InnerState::build_version(document_id, current + 1, version);
        state.check_unique(&appended)?;
        state.versions.insert(appended.id, appended.clone());

        let document = state
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| AppError::not_found(format!("Document {document_id} not found")))?;
        document.current_version = appended.version_number;
        document.title = version.title.clone();
        document.updated_by = version.created_by;
        document.updated_at = appended.created_at;

        Ok(DocumentWithVersion {
            document: document.clone(),
            latest_version: appended,
        })
    }

    async fn delete_document(&self, id: DocumentId) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.documents.remove(&id).is_some();
        state.versions.retain(|_, v| v.document_id != id);
        Ok(removed)
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
