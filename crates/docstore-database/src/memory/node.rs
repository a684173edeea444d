//! In-memory classification tree.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use docstore_core::error::AppError;
use docstore_core::result::AppResult;
use docstore_core::types::id::NodeId;
use docstore_entity::node::Node;

use crate::repositories::NodeDirectory;

/// Node directory held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryNodeDirectory {
    nodes: Arc<RwLock<HashMap<NodeId, Node>>>,
    /// Treat unknown nodes as collections of their own.
    permissive: bool,
}

impl MemoryNodeDirectory {
    /// Create an empty directory that only knows inserted nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory that resolves unknown nodes to themselves.
    ///
    /// Used with the memory driver, where no tree service is available.
    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::default()
        }
    }

    /// Add a top-level collection.
    pub async fn add_collection(&self, name: &str) -> NodeId {
        let id = NodeId::new();
        self.nodes.write().await.insert(
            id,
            Node {
                id,
                parent_id: None,
                collection_id: id,
                name: name.to_string(),
                level: 1,
            },
        );
        id
    }

    /// Add a node below `parent`.
    pub async fn add_child(&self, parent: NodeId, name: &str) -> AppResult<NodeId> {
        let mut nodes = self.nodes.write().await;
        let (collection_id, level) = nodes
            .get(&parent)
            .map(|p| (p.collection_id, p.level + 1))
            .ok_or_else(|| AppError::not_found(format!("Node {parent} not found")))?;
        if level > 4 {
            return Err(AppError::validation("Classification tree is at most four levels deep"));
        }

        let id = NodeId::new();
        nodes.insert(
            id,
            Node {
                id,
                parent_id: Some(parent),
                collection_id,
                name: name.to_string(),
                level,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl NodeDirectory for MemoryNodeDirectory {
    async fn resolve_collection(&self, node_id: NodeId) -> AppResult<NodeId> {
        match self.nodes.read().await.get(&node_id) {
            Some(node) => Ok(node.collection_id),
            None if self.permissive => Ok(node_id),
            None => Err(AppError::not_found(format!("Node {node_id} not found"))),
        }
    }
}
