//! Repository traits and their PostgreSQL implementations.

pub mod document;
pub mod job;
pub mod node;

use std::sync::Arc;

use sqlx::PgPool;

use docstore_core::error::{AppError, ErrorKind};

pub use document::{DocumentRepository, PgDocumentRepository};
pub use job::{JobRepository, PgJobRepository};
pub use node::{NodeDirectory, PgNodeDirectory};

use crate::memory::{MemoryDocumentRepository, MemoryJobRepository, MemoryNodeDirectory};

/// The repositories one process works against.
#[derive(Debug, Clone)]
pub struct RepositorySet {
    /// Documents and versions.
    pub documents: Arc<dyn DocumentRepository>,
    /// Job queue table.
    pub jobs: Arc<dyn JobRepository>,
    /// Classification tree lookups.
    pub nodes: Arc<dyn NodeDirectory>,
}

impl RepositorySet {
    /// Repositories backed by a PostgreSQL pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            documents: Arc::new(PgDocumentRepository::new(pool.clone())),
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            nodes: Arc::new(PgNodeDirectory::new(pool)),
        }
    }

    /// Process-local repositories around the given node directory.
    pub fn memory(nodes: MemoryNodeDirectory) -> Self {
        Self {
            documents: Arc::new(MemoryDocumentRepository::new()),
            jobs: Arc::new(MemoryJobRepository::new()),
            nodes: Arc::new(nodes),
        }
    }
}

/// Map a failed write inside a metadata transaction.
///
/// Unique violations, serialization failures, and deadlocks mean a
/// concurrent writer won; the caller should re-read and try again.
pub(crate) fn write_error(context: &str, err: sqlx::Error) -> AppError {
    let lost_race = match &err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation()
                || matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    };
    let kind = if lost_race {
        ErrorKind::Transaction
    } else {
        ErrorKind::Database
    };
    AppError::with_source(kind, format!("{context}: {err}"), err)
}
