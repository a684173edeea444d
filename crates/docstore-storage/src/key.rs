//! Object key derivation.
//!
//! Keys look like `documents/<collection-id>/<unique-id><ext>`. Every write
//! gets a key nobody else uses, so concurrent writers never touch the same
//! object.

use uuid::Uuid;

use docstore_core::types::id::{JobId, NodeId};

/// Top-level prefix for all document content.
pub const KEY_PREFIX: &str = "documents";

/// Return the lowercase extension of `file_name` including the dot, or an
/// empty string.
pub fn extension_of(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < base.len() => base[idx..].to_lowercase(),
        _ => String::new(),
    }
}

/// Build a key under `collection_id` for `unique` and the extension of
/// `file_name`.
pub fn object_key(collection_id: NodeId, unique: Uuid, file_name: &str) -> String {
    format!(
        "{KEY_PREFIX}/{collection_id}/{unique}{}",
        extension_of(file_name)
    )
}

/// Key for the content ingested by `job_id`.
///
/// Stable across retries of the same job, which lets a retry detect that an
/// earlier attempt already stored the bytes.
pub fn ingest_key(collection_id: NodeId, job_id: JobId, file_name: &str) -> String {
    object_key(collection_id, job_id.into_uuid(), file_name)
}

/// Derive a fresh key in the same namespace and with the same extension as
/// `key`.
pub fn sibling_key(key: &str) -> String {
    let (dir, name) = match key.rfind('/') {
        Some(idx) => (&key[..idx], &key[idx + 1..]),
        None => ("", key),
    };
    let ext = extension_of(name);
    let unique = Uuid::new_v4();
    if dir.is_empty() {
        format!("{unique}{ext}")
    } else {
        format!("{dir}/{unique}{ext}")
    }
}
