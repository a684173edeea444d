//! Document entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use docstore_core::types::id::{DocumentId, NodeId, PrincipalId};

use super::version::Version;

/// One logical file slot within a classification node.
///
/// `current_version` always equals the highest `version_number` among the
/// document's versions once a transaction has committed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Document {
    /// Unique document identifier.
    pub id: DocumentId,
    /// The classification node owning this document.
    pub node_id: NodeId,
    /// Display title.
    pub title: String,
    /// Number of the newest version.
    pub current_version: i32,
    /// Principal who created the document.
    pub created_by: PrincipalId,
    /// When the document was created.
    pub created_at: DateTime<Utc>,
    /// Principal who produced the newest version.
    pub updated_by: PrincipalId,
    /// When the newest version was committed.
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a new document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    /// The classification node to place the document in.
    pub node_id: NodeId,
    /// Display title.
    pub title: String,
    /// The creating principal.
    pub created_by: PrincipalId,
}

/// A document together with its newest version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentWithVersion {
    /// The document row.
    pub document: Document,
    /// The version `document.current_version` points at.
    pub latest_version: Version,
}

impl DocumentWithVersion {
    /// Check that the pointer and the attached version agree.
    pub fn is_consistent(&self) -> bool {
        self.latest_version.document_id == self.document.id
            && self.latest_version.version_number == self.document.current_version
    }
}
