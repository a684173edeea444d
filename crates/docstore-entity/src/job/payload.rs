//! Typed job payload definitions.

use serde::{Deserialize, Serialize};

use docstore_core::types::id::{DocumentId, NodeId, PrincipalId};

/// Where an ingested upload lands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestTarget {
    /// First upload: create a document under `node_id`.
    NewDocument {
        /// Classification node for the new document.
        node_id: NodeId,
        /// Title of the new document.
        title: String,
    },
    /// Append a version to an existing document.
    NewVersion {
        /// Target document.
        document_id: DocumentId,
        /// Replacement title; the current title is kept when absent.
        title: Option<String>,
    },
}

/// Payload of a `document_ingest` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    /// Spooled upload awaiting transfer into the object store.
    pub temp_path: String,
    /// Original file name.
    pub file_name: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// Declared size in bytes.
    pub size_bytes: i64,
    /// Target document or node.
    pub target: IngestTarget,
    /// Collection resolved at enqueue time; scopes the object key.
    pub collection_id: NodeId,
    /// Optional description of the change.
    pub changelog: Option<String>,
    /// Principal recorded as the version creator.
    pub principal_id: PrincipalId,
}

impl IngestPayload {
    /// Job type under which ingestion jobs are registered.
    pub const JOB_TYPE: &'static str = "document_ingest";
    /// Queue ingestion jobs are placed on.
    pub const QUEUE: &'static str = "ingest";
}

/// Result recorded on a completed ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestResult {
    /// Document the content was committed to.
    pub document_id: DocumentId,
    /// Version number that was created.
    pub version_number: i32,
    /// Original file name.
    pub file_name: String,
    /// Stored size in bytes.
    pub file_size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_is_tagged() {
        let target = IngestTarget::NewVersion {
            document_id: DocumentId::new(),
            title: None,
        };
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["kind"], "new_version");

        let parsed: IngestTarget = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, target);
    }
}
