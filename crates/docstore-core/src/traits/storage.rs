//! Object store trait for pluggable blob storage backends.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::io::ReaderStream;

use crate::error::{AppError, ErrorKind};
use crate::result::AppResult;

/// A byte stream type used for reading and writing object contents.
///
/// Errors in the middle of a transfer are yielded as items so a consumer
/// never mistakes a truncated body for a complete one.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Key-addressed blob storage.
///
/// Keys are opaque `/`-separated strings chosen by the caller. Every
/// implementation must behave identically so that callers never branch on
/// the backend in use. Implementations live in `docstore-storage`.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug + 'static {
    /// Return the backend name (e.g., "local", "s3").
    fn backend(&self) -> &str;

    /// Check whether the backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;

    /// Write `data` at `key`, replacing any existing object.
    ///
    /// The object becomes visible only once the whole stream has been
    /// written. Returns the number of bytes stored.
    async fn put(&self, key: &str, data: ByteStream) -> AppResult<u64>;

    /// Stream a local file into the store at `key`.
    async fn put_file(&self, key: &str, path: &Path) -> AppResult<u64> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            let kind = match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                _ => ErrorKind::Storage,
            };
            AppError::with_source(kind, format!("Failed to open {}", path.display()), e)
        })?;
        self.put(key, ReaderStream::new(file).boxed()).await
    }

    /// Open the object at `key` for streaming.
    ///
    /// Fails with `NotFound` when the key does not exist.
    async fn get_stream(&self, key: &str) -> AppResult<ByteStream>;

    /// Duplicate the object at `from` to `to`.
    async fn copy(&self, from: &str, to: &str) -> AppResult<()>;

    /// Remove the object at `key`. A missing key is not an error.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Check whether an object exists at `key`.
    async fn exists(&self, key: &str) -> AppResult<bool>;
}
