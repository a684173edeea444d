//! Application state shared across all handlers.

use std::sync::Arc;

use docstore_core::config::AppConfig;
use docstore_service::document::{DownloadService, VersionEngine};
use docstore_worker::intake::IngestionService;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
/// All fields are `Arc`-wrapped for cheap cloning across tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Version lineage: reads, revert, delete
    pub engine: Arc<VersionEngine>,
    /// Content streaming
    pub downloads: Arc<DownloadService>,
    /// Upload intake and job status
    pub intake: Arc<IngestionService>,
}
