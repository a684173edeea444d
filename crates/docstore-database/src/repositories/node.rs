//! Classification tree lookups.

use async_trait::async_trait;
use sqlx::PgPool;

use docstore_core::error::{AppError, ErrorKind};
use docstore_core::result::AppResult;
use docstore_core::types::id::NodeId;

/// Read access to the classification tree owned by another service.
#[async_trait]
pub trait NodeDirectory: Send + Sync + std::fmt::Debug + 'static {
    /// Resolve a node to the collection that scopes its documents' storage.
    ///
    /// Fails with `NotFound` when the node does not exist.
    async fn resolve_collection(&self, node_id: NodeId) -> AppResult<NodeId>;
}

/// Node directory reading the shared `nodes` table.
#[derive(Debug, Clone)]
pub struct PgNodeDirectory {
    pool: PgPool,
}

impl PgNodeDirectory {
    /// Create a new node directory.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeDirectory for PgNodeDirectory {
    async fn resolve_collection(&self, node_id: NodeId) -> AppResult<NodeId> {
        sqlx::query_scalar::<_, NodeId>("SELECT collection_id FROM nodes WHERE id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to resolve node", e))?
            .ok_or_else(|| AppError::not_found(format!("Node {node_id} not found")))
    }
}
