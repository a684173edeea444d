//! Spools multipart uploads to local disk before they are enqueued.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use axum::extract::multipart::Field;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use docstore_core::error::AppError;

use crate::error::ApiError;

/// Multipart field carrying the file body.
pub const FILE_FIELD: &str = "file";

/// MIME type assumed when the client sends none.
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A spool file that is removed on drop unless kept.
#[derive(Debug)]
pub struct SpoolFile {
    path: Option<PathBuf>,
}

impl SpoolFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// Path of the spool file.
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Hand ownership of the file to the ingestion job.
    pub fn keep(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove spool file");
                }
            }
        }
    }
}

/// A multipart request with its file spooled to disk.
#[derive(Debug)]
pub struct SpooledUpload {
    /// The spooled body.
    pub file: SpoolFile,
    /// Original file name.
    pub file_name: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// Bytes written.
    pub size_bytes: u64,
    /// Text fields sent alongside the file.
    pub fields: HashMap<String, String>,
}

impl SpooledUpload {
    /// A text field, trimmed; absent when missing or blank.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn multipart_error(e: impl std::fmt::Display) -> ApiError {
    ApiError(AppError::validation(format!("Multipart error: {e}")))
}

/// Stream every multipart field; the file chunk by chunk into `temp_dir`.
///
/// Uploads larger than `max_size` are rejected as soon as the limit is
/// crossed. On any error the partial spool file is removed.
pub async fn spool_multipart(
    multipart: &mut Multipart,
    temp_dir: &Path,
    max_size: u64,
) -> Result<SpooledUpload, ApiError> {
    let mut fields = HashMap::new();
    let mut spooled: Option<(SpoolFile, String, String, u64)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        if name == FILE_FIELD {
            if spooled.is_some() {
                return Err(AppError::validation("Only one file may be uploaded per request").into());
            }
            let file_name = field
                .file_name()
                .map(str::to_string)
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| AppError::validation("The file field must carry a file name"))?;
            let mime_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
            let (file, size) = spool_field(field, temp_dir, max_size).await?;
            spooled = Some((file, file_name, mime_type, size));
        } else {
            let text = field.text().await.map_err(multipart_error)?;
            fields.insert(name, text);
        }
    }

    let (file, file_name, mime_type, size_bytes) =
        spooled.ok_or_else(|| AppError::validation("A file field is required"))?;

    Ok(SpooledUpload {
        file,
        file_name,
        mime_type,
        size_bytes,
        fields,
    })
}

async fn spool_field(
    mut field: Field<'_>,
    temp_dir: &Path,
    max_size: u64,
) -> Result<(SpoolFile, u64), ApiError> {
    tokio::fs::create_dir_all(temp_dir).await.map_err(AppError::from)?;
    let spool = SpoolFile::new(temp_dir.join(format!("upload-{}.partial", Uuid::new_v4())));
    let mut out = tokio::fs::File::create(spool.path()).await.map_err(AppError::from)?;

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        if written > max_size {
            return Err(AppError::validation(format!(
                "Upload exceeds the limit of {max_size} bytes"
            ))
            .into());
        }
        out.write_all(&chunk).await.map_err(AppError::from)?;
    }
    out.flush().await.map_err(AppError::from)?;
    out.sync_all().await.map_err(AppError::from)?;

    Ok((spool, written))
}
