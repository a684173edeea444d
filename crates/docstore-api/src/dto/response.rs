//! Response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docstore_core::types::id::{DocumentId, JobId, NodeId, PrincipalId, VersionId};
use docstore_entity::document::{DocumentWithVersion, Version};

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// An upload accepted for asynchronous ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedJobResponse {
    /// Job to poll.
    pub job_id: JobId,
    /// Where to poll it.
    pub status_url: String,
}

impl AcceptedJobResponse {
    /// Response for a freshly enqueued job.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status_url: format!("/api/jobs/{job_id}"),
        }
    }
}

/// One entry of a document's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    /// Version ID.
    pub id: VersionId,
    /// Version number.
    pub version_number: i32,
    /// Title at the time of this version.
    pub title: String,
    /// Description of the change.
    pub changelog: Option<String>,
    /// Original file name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// Creator.
    pub created_by: PrincipalId,
    /// Created at.
    pub created_at: DateTime<Utc>,
}

impl From<Version> for VersionResponse {
    fn from(v: Version) -> Self {
        Self {
            id: v.id,
            version_number: v.version_number,
            title: v.title,
            changelog: v.changelog,
            file_name: v.file_name,
            mime_type: v.mime_type,
            size_bytes: v.size_bytes,
            created_by: v.created_by,
            created_at: v.created_at,
        }
    }
}

/// A document with its current version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    /// Document ID.
    pub id: DocumentId,
    /// Classification node.
    pub node_id: NodeId,
    /// Current title.
    pub title: String,
    /// Number of the current version.
    pub current_version: i32,
    /// Creator.
    pub created_by: PrincipalId,
    /// Created at.
    pub created_at: DateTime<Utc>,
    /// Last editor.
    pub updated_by: PrincipalId,
    /// Updated at.
    pub updated_at: DateTime<Utc>,
    /// The current version.
    pub latest_version: VersionResponse,
}

impl From<DocumentWithVersion> for DocumentResponse {
    fn from(d: DocumentWithVersion) -> Self {
        let doc = d.document;
        Self {
            id: doc.id,
            node_id: doc.node_id,
            title: doc.title,
            current_version: doc.current_version,
            created_by: doc.created_by,
            created_at: doc.created_at,
            updated_by: doc.updated_by,
            updated_at: doc.updated_at,
            latest_version: d.latest_version.into(),
        }
    }
}

/// Simple message response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Message.
    pub message: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: "ok" or "degraded".
    pub status: String,
    /// Version of the server.
    pub version: String,
    /// Metadata store status.
    pub database: String,
    /// Object store status.
    pub storage: String,
    /// Object store backend in use.
    pub storage_backend: String,
}
