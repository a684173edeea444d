//! Route definitions for the DocStore HTTP API.
//!
//! All routes are mounted under `/api`. The router receives `AppState`
//! and passes it to all handlers via Axum's `State` extractor.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

/// Room for multipart boundaries and text fields beyond the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Build the Axum router with all routes.
///
/// Receives the fully-constructed `AppState` and threads it through
/// every route via `.with_state(state)`.
pub fn build_router(state: AppState) -> Router {
    let max_body = state
        .config
        .storage
        .max_upload_size_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let max_body = usize::try_from(max_body).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .merge(document_routes())
        .merge(job_routes())
        .merge(health_routes());

    Router::new()
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}

/// Upload, history, revert, download, delete
fn document_routes() -> Router<AppState> {
    Router::new()
        .route("/documents", post(handlers::documents::create_document))
        .route(
            "/documents/{id}",
            get(handlers::documents::get_document).delete(handlers::documents::delete_document),
        )
        .route(
            "/documents/{id}/versions",
            get(handlers::documents::list_versions).post(handlers::documents::upload_version),
        )
        .route("/documents/{id}/revert", post(handlers::documents::revert))
        .route(
            "/documents/{id}/download",
            get(handlers::documents::download_latest),
        )
        .route(
            "/documents/{id}/versions/{number}/download",
            get(handlers::documents::download_version),
        )
}

/// Ingestion job status
fn job_routes() -> Router<AppState> {
    Router::new().route("/jobs/{id}", get(handlers::jobs::get_job))
}

/// Health check
fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health))
}
