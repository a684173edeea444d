//! Document and version persistence.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use docstore_core::error::{AppError, ErrorKind};
use docstore_core::result::AppResult;
use docstore_core::types::id::{DocumentId, VersionId};
use docstore_entity::document::{
    Document, DocumentWithVersion, NewDocument, NewVersion, Version,
};

use super::write_error;

/// Persistence for documents and their version lineage.
///
/// The two write operations are the only places `current_version` changes,
/// and each runs as a single transaction that inserts the version row and
/// moves the pointer together.
#[async_trait]
pub trait DocumentRepository: Send + Sync + std::fmt::Debug + 'static {
    /// Find a document by ID.
    async fn find_document(&self, id: DocumentId) -> AppResult<Option<Document>>;

    /// Find a version by ID.
    async fn find_version(&self, id: VersionId) -> AppResult<Option<Version>>;

    /// Find a version of `document_id` by number.
    async fn find_version_by_number(
        &self,
        document_id: DocumentId,
        version_number: i32,
    ) -> AppResult<Option<Version>>;

    /// Find the version stored at `object_key`, if any.
    async fn find_version_by_object_key(&self, object_key: &str) -> AppResult<Option<Version>>;

    /// List all versions of a document, newest first.
    async fn list_versions(&self, document_id: DocumentId) -> AppResult<Vec<Version>>;

    /// Create a document together with version 1.
    async fn create_document(
        &self,
        document: &NewDocument,
        version: &NewVersion,
    ) -> AppResult<DocumentWithVersion>;

    /// Append version `current_version + 1` and move the pointer.
    ///
    /// The document title follows the new version's title snapshot.
    /// Fails with `NotFound` if the document is gone and with `Transaction`
    /// when a concurrent commit won the race.
    async fn append_version(
        &self,
        document_id: DocumentId,
        version: &NewVersion,
    ) -> AppResult<DocumentWithVersion>;

    /// Delete a document and, by cascade, its versions.
    ///
    /// Returns whether a row was deleted.
    async fn delete_document(&self, id: DocumentId) -> AppResult<bool>;

    /// Check whether the backing store is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}

/// PostgreSQL document repository.
#[derive(Debug, Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    /// Create a new document repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })
    }

    async fn insert_version(
        tx: &mut Transaction<'static, Postgres>,
        document_id: DocumentId,
        version_number: i32,
        version: &NewVersion,
    ) -> AppResult<Version> {
        sqlx::query_as::<_, Version>(
            "INSERT INTO versions (document_id, version_number, title, changelog, object_key, \
             file_name, mime_type, size_bytes, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(document_id)
        .bind(version_number)
        .bind(&version.title)
        .bind(&version.changelog)
        .bind(&version.object_key)
        .bind(&version.file_name)
        .bind(&version.mime_type)
        .bind(version.size_bytes)
        .bind(version.created_by)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| write_error("Failed to insert version", e))
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn find_document(&self, id: DocumentId) -> AppResult<Option<Document>> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find document", e))
    }

    async fn find_version(&self, id: VersionId) -> AppResult<Option<Version>> {
        sqlx::query_as::<_, Version>("SELECT * FROM versions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find version", e))
    }

    async fn find_version_by_number(
        &self,
        document_id: DocumentId,
        version_number: i32,
    ) -> AppResult<Option<Version>> {
        sqlx::query_as::<_, Version>(
            "SELECT * FROM versions WHERE document_id = $1 AND version_number = $2",
        )
        .bind(document_id)
        .bind(version_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find version", e))
    }

    async fn find_version_by_object_key(&self, object_key: &str) -> AppResult<Option<Version>> {
        sqlx::query_as::<_, Version>("SELECT * FROM versions WHERE object_key = $1")
            .bind(object_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find version by key", e)
            })
    }

    async fn list_versions(&self, document_id: DocumentId) -> AppResult<Vec<Version>> {
        sqlx::query_as::<_, Version>(
            "SELECT * FROM versions WHERE document_id = $1 ORDER BY version_number DESC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list versions", e))
    }

    async fn create_document(
        &self,
        document: &NewDocument,
        version: &NewVersion,
    ) -> AppResult<DocumentWithVersion> {
        let mut tx = self.begin().await?;

        let created = sqlx::query_as::<_, Document>(
            "INSERT INTO documents (node_id, title, current_version, created_by, updated_by) \
             VALUES ($1, $2, 1, $3, $3) RETURNING *",
        )
        .bind(document.node_id)
        .bind(&document.title)
        .bind(document.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error("Failed to insert document", e))?;

        let first = Self::insert_version(&mut tx, created.id, 1, version).await?;

        tx.commit()
            .await
            .map_err(|e| write_error("Failed to commit document", e))?;

        debug!(document_id = %created.id, key = %first.object_key, "Created document");
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
        let mut tx = self.begin().await?;

        // Row lock serializes concurrent appends to the same document.
        let current = sqlx::query_scalar::<_, i32>(
            "SELECT current_version FROM documents WHERE id = $1 FOR UPDATE",
        )
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| write_error("Failed to lock document", e))?
        .ok_or_else(|| AppError::not_found(format!("Document {document_id} not found")))?;

        let next = current + 1;
        let appended = Self::insert_version(&mut tx, document_id, next, version).await?;

        let updated = sqlx::query_as::<_, Document>(
            "UPDATE documents SET current_version = $2, title = $3, updated_by = $4, \
             updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(document_id)
        .bind(next)
        .bind(&version.title)
        .bind(version.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error("Failed to update document", e))?;

        tx.commit()
            .await
            .map_err(|e| write_error("Failed to commit version", e))?;

        debug!(document_id = %document_id, version = next, "Appended version");
        Ok(DocumentWithVersion {
            document: updated,
            latest_version: appended,
        })
    }

    async fn delete_document(&self, id: DocumentId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to delete document", e)
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> AppResult<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|v| v == 1)
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Health check failed", e))
    }
}
