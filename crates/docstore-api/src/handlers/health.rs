//! Health check handler.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::dto::response::{ApiResponse, HealthResponse};
use crate::state::AppState;

fn describe(check: Result<bool, docstore_core::error::AppError>, up: &str) -> (bool, String) {
    match check {
        Ok(true) => (true, up.to_string()),
        Ok(false) => (false, "unavailable".to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (false, "unavailable".to_string())
        }
    }
}

/// GET /api/health
pub async fn health(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let store = state.engine.store();
    let (db_ok, database) = describe(state.engine.documents().health_check().await, "connected");
    let (storage_ok, storage) = describe(store.health_check().await, "available");

    let healthy = db_ok && storage_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ApiResponse::ok(HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
            storage,
            storage_backend: store.backend().to_string(),
        })),
    )
}
