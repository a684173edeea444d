//! Classification node entity model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use docstore_core::types::id::NodeId;

/// A node of the four-level classification tree.
///
/// The tree itself is maintained elsewhere; DocStore only reads it to find
/// the collection a document is stored under.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Node {
    /// Unique node identifier.
    pub id: NodeId,
    /// Parent node (None for a collection).
    pub parent_id: Option<NodeId>,
    /// Top-level collection owning this subtree.
    pub collection_id: NodeId,
    /// Display name.
    pub name: String,
    /// Depth in the tree, 1 through 4.
    pub level: i16,
}

impl Node {
    /// Check whether this node is a top-level collection.
    pub fn is_collection(&self) -> bool {
        self.parent_id.is_none()
    }
}
