//! Local filesystem object store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use docstore_core::error::{AppError, ErrorKind};
use docstore_core::result::AppResult;
use docstore_core::traits::storage::{ByteStream, ObjectStore};

/// Object store backed by a directory tree.
///
/// Writes land in a hidden `.partial` sibling first and are renamed into
/// place once complete, so readers never observe a half-written object.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    /// Root directory for all stored objects.
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a new local object store rooted at the given path.
    pub async fn new(root_path: impl AsRef<Path>) -> AppResult<Self> {
        let root = root_path.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create storage root: {}", root.display()),
                e,
            )
        })?;
        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path within the root, rejecting keys that could
    /// escape it.
    fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.contains('\\') {
            return Err(AppError::validation(format!("Invalid object key: {key:?}")));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(AppError::validation(format!("Invalid object key: {key:?}")));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Ensure the parent directory of a path exists.
    async fn ensure_parent(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to create parent directory: {}", parent.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    /// Staging path next to `path` for an in-progress write.
    fn partial_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.{}.partial", Uuid::new_v4()))
    }

    /// Stream `data` into a new file at `partial`, returning bytes written.
    async fn write_partial(partial: &Path, key: &str, mut data: ByteStream) -> AppResult<u64> {
        let mut file = fs::File::create(partial).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to create object: {key}"),
                e,
            )
        })?;

        let mut total_bytes = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk
                .map_err(|e| AppError::with_source(ErrorKind::Storage, "Stream read error", e))?;
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| {
                AppError::with_source(ErrorKind::Storage, "Failed to write chunk", e)
            })?;
        }

        file.flush()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Storage, "Failed to flush object", e))?;
        file.sync_all()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Storage, "Failed to sync object", e))?;

        Ok(total_bytes)
    }

    /// Move a finished staging file into place, removing it on failure.
    async fn publish(partial: &Path, path: &Path, key: &str) -> AppResult<()> {
        if let Err(e) = fs::rename(partial, path).await {
            discard(partial).await;
            return Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to publish object: {key}"),
                e,
            ));
        }
        Ok(())
    }
}

/// Best-effort removal of a staging file.
async fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %partial.display(), error = %e, "Failed to remove partial object");
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn backend(&self) -> &str {
        "local"
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn put(&self, key: &str, data: ByteStream) -> AppResult<u64> {
        let path = self.resolve(key)?;
        self.ensure_parent(&path).await?;

        let partial = Self::partial_path(&path);
        let total_bytes = match Self::write_partial(&partial, key, data).await {
            Ok(n) => n,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };
        Self::publish(&partial, &path, key).await?;

        debug!(key, bytes = total_bytes, "Stored object");
        Ok(total_bytes)
    }

    async fn get_stream(&self, key: &str) -> AppResult<ByteStream> {
        let path = self.resolve(key)?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(format!("Object not found: {key}"))
            } else {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!("Failed to open object: {key}"),
                    e,
                )
            }
        })?;

        Ok(ReaderStream::new(file).boxed())
    }

    async fn copy(&self, from: &str, to: &str) -> AppResult<()> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        self.ensure_parent(&to_path).await?;

        let partial = Self::partial_path(&to_path);
        if let Err(e) = fs::copy(&from_path, &partial).await {
            discard(&partial).await;
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(AppError::not_found(format!("Object not found: {from}")));
            }
            return Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to copy {from} -> {to}"),
                e,
            ));
        }
        Self::publish(&partial, &to_path, to).await?;

        debug!(from, to, "Copied object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to delete object: {key}"),
                e,
            )),
        }
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.resolve(key)?;
        fs::try_exists(&path).await.map_err(|e| {
            AppError::with_source(
                ErrorKind::Storage,
                format!("Failed to stat object: {key}"),
                e,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn body(parts: &[&'static str]) -> ByteStream {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        futures::stream::iter(chunks).boxed()
    }

    async fn read_all(store: &LocalObjectStore, key: &str) -> Vec<u8> {
        let mut stream = store.get_stream(key).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        let written = store
            .put("documents/c1/a.txt", body(&["hello ", "world"]))
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert!(store.exists("documents/c1/a.txt").await.unwrap());
        assert_eq!(read_all(&store, "documents/c1/a.txt").await, b"hello world");

        store.delete("documents/c1/a.txt").await.unwrap();
        assert!(!store.exists("documents/c1/a.txt").await.unwrap());
        store.delete("documents/c1/a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        store.put("k.bin", body(&["first version"])).await.unwrap();
        store.put("k.bin", body(&["second"])).await.unwrap();
        assert_eq!(read_all(&store, "k.bin").await, b"second");
    }

    #[tokio::test]
    async fn test_failed_put_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("connection reset")),
        ];
        let err = store
            .put("documents/c1/broken.pdf", futures::stream::iter(chunks).boxed())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
        assert!(!store.exists("documents/c1/broken.pdf").await.unwrap());

        let mut entries = fs::read_dir(dir.path().join("documents/c1")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        store.put("a/orig.txt", body(&["content"])).await.unwrap();
        store.copy("a/orig.txt", "b/copy.txt").await.unwrap();

        assert_eq!(read_all(&store, "a/orig.txt").await, b"content");
        assert_eq!(read_all(&store, "b/copy.txt").await, b"content");

        let err = store.copy("a/missing.txt", "b/other.txt").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists("b/other.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        let err = store.get_stream("nope/missing.pdf").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        for key in ["../etc/passwd", "/abs/path", "a//b", "a/./b", ""] {
            let err = store.put(key, body(&["x"])).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation, "key {key:?}");
        }
    }

    #[tokio::test]
    async fn test_put_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("store")).await.unwrap();
        let source = dir.path().join("upload.tmp");
        fs::write(&source, vec![7u8; 4096]).await.unwrap();

        let written = store.put_file("documents/x/y.bin", &source).await.unwrap();
        assert_eq!(written, 4096);
        assert_eq!(read_all(&store, "documents/x/y.bin").await, vec![7u8; 4096]);

        let err = store
            .put_file("documents/x/z.bin", &dir.path().join("gone.tmp"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
