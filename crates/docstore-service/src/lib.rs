//! # docstore-service
//!
//! Business logic for DocStore's version lineage. The [`VersionEngine`]
//! is the only code that commits versions; the [`DownloadService`] streams
//! stored content back out.
//!
//! Services follow constructor injection: all dependencies are provided
//! at construction time via `Arc` references.

pub mod context;
pub mod document;

pub use context::RequestContext;
pub use document::{CommittedUpload, Download, DownloadService, StoredUpload, VersionEngine};
