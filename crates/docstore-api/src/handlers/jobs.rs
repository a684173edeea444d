//! Ingestion job status handler.

use axum::Json;
use axum::extract::{Path, State};

use docstore_core::types::id::JobId;
use docstore_worker::queue::JobStatusView;

use crate::dto::response::ApiResponse;
use crate::error::ApiError;
use crate::extractors::{Principal, parse_id};
use crate::state::AppState;

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    _principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobStatusView>>, ApiError> {
    let job_id: JobId = parse_id(&id, "job id")?;
    let view = state.intake.status(job_id).await?;
    Ok(Json(ApiResponse::ok(view)))
}
