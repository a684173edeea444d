//! Document version entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use docstore_core::types::id::{DocumentId, PrincipalId, VersionId};

/// One immutable revision of a document.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Version {
    /// Unique version identifier.
    pub id: VersionId,
    /// The document this version belongs to.
    pub document_id: DocumentId,
    /// Sequential version number, unique per document.
    pub version_number: i32,
    /// Title snapshot at the time of this version.
    pub title: String,
    /// Optional description of the change.
    pub changelog: Option<String>,
    /// Key of this version's content in the object store.
    pub object_key: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// Principal who created this version.
    pub created_by: PrincipalId,
    /// When this version was created.
    pub created_at: DateTime<Utc>,
}

impl Version {
    /// Build the row for a revert to this version, stored at `object_key`.
    pub fn revert_copy(&self, object_key: String, actor: PrincipalId) -> NewVersion {
        NewVersion {
            title: self.title.clone(),
            changelog: Some(format!("Reverted to version {}", self.version_number)),
            object_key,
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            size_bytes: self.size_bytes,
            created_by: actor,
        }
    }
}

/// Data required to append a version. The number is assigned on commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVersion {
    /// Title snapshot.
    pub title: String,
    /// Optional description of the change.
    pub changelog: Option<String>,
    /// Key of the already-stored content.
    pub object_key: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// The creating principal.
    pub created_by: PrincipalId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_copy_keeps_content_metadata() {
        let original = Version {
            id: VersionId::new(),
            document_id: DocumentId::new(),
            version_number: 1,
            title: "Quality Manual".to_string(),
            changelog: None,
            object_key: "documents/a/1.pdf".to_string(),
            file_name: "manual.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 1024,
            created_by: PrincipalId::new(),
            created_at: Utc::now(),
        };
        let actor = PrincipalId::new();

        let copy = original.revert_copy("documents/a/2.pdf".to_string(), actor);

        assert_eq!(copy.changelog.as_deref(), Some("Reverted to version 1"));
        assert_eq!(copy.object_key, "documents/a/2.pdf");
        assert_eq!(copy.size_bytes, 1024);
        assert_eq!(copy.mime_type, "application/pdf");
        assert_eq!(copy.created_by, actor);
    }
}
