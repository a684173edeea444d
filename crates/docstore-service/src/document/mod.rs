//! Document version lineage and content delivery.

pub mod download;
pub mod version;

pub use download::{Download, DownloadService};
pub use version::{CommittedUpload, StoredUpload, VersionEngine};
