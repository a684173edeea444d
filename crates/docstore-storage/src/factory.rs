//! Backend selection.

use std::sync::Arc;

use tracing::info;

use docstore_core::config::storage::{StorageBackend, StorageConfig};
use docstore_core::result::AppResult;
use docstore_core::traits::storage::ObjectStore;

use crate::providers::LocalObjectStore;

/// Build the object store named by `config.backend`.
///
/// Called once at startup; everything downstream works against the
/// returned trait object.
pub async fn build_object_store(config: &StorageConfig) -> AppResult<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::Local => Arc::new(LocalObjectStore::new(&config.local.root_path).await?),
        StorageBackend::S3 => build_s3(config).await?,
    };
    info!(backend = store.backend(), "Object store ready");
    Ok(store)
}

#[cfg(feature = "s3")]
async fn build_s3(config: &StorageConfig) -> AppResult<Arc<dyn ObjectStore>> {
    Ok(Arc::new(crate::providers::S3ObjectStore::new(&config.s3).await?))
}

#[cfg(not(feature = "s3"))]
async fn build_s3(_config: &StorageConfig) -> AppResult<Arc<dyn ObjectStore>> {
    Err(docstore_core::error::AppError::configuration(
        "storage.backend = \"s3\" requires the `s3` feature",
    ))
}
