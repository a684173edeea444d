//! Request DTOs.

use serde::{Deserialize, Serialize};

use docstore_core::types::id::VersionId;

/// Body of `POST /api/documents/{id}/revert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertRequest {
    /// Version whose content becomes the new current version.
    pub version_id: VersionId,
}
