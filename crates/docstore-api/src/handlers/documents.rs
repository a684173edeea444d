//! Document upload, history, revert, download, and delete handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::Response;

use docstore_core::error::AppError;
use docstore_core::types::id::{DocumentId, NodeId};
use docstore_service::document::Download;
use docstore_worker::intake::IngestRequest;

use crate::dto::request::RevertRequest;
use crate::dto::response::{
    AcceptedJobResponse, ApiResponse, DocumentResponse, MessageResponse, VersionResponse,
};
use crate::error::ApiError;
use crate::extractors::{Principal, parse_id};
use crate::state::AppState;
use crate::upload::{SpooledUpload, spool_multipart};

type Accepted = (StatusCode, Json<ApiResponse<AcceptedJobResponse>>);

/// POST /api/documents: multipart `file`, `node_id`, optional `title` and `changelog`
pub async fn create_document(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<Accepted, ApiError> {
    let upload = spool(&state, &mut multipart).await?;
    let node_id: NodeId = match upload.field("node_id") {
        Some(raw) => parse_id(raw, "node_id")?,
        None => return Err(AppError::validation("node_id is required").into()),
    };
    enqueue(&state, &principal, upload, None, Some(node_id)).await
}

/// POST /api/documents/{id}/versions: multipart `file`, optional `title` and `changelog`
pub async fn upload_version(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Accepted, ApiError> {
    let document_id: DocumentId = parse_id(&id, "document id")?;
    let upload = spool(&state, &mut multipart).await?;
    enqueue(&state, &principal, upload, Some(document_id), None).await
}

async fn spool(state: &AppState, multipart: &mut Multipart) -> Result<SpooledUpload, ApiError> {
    let storage = &state.config.storage;
    spool_multipart(
        multipart,
        std::path::Path::new(&storage.temp_dir),
        storage.max_upload_size_bytes,
    )
    .await
}

/// The spool file is removed if the intake rejects the upload.
async fn enqueue(
    state: &AppState,
    principal: &Principal,
    upload: SpooledUpload,
    document_id: Option<DocumentId>,
    node_id: Option<NodeId>,
) -> Result<Accepted, ApiError> {
    let request = IngestRequest {
        temp_path: upload.file.path().to_path_buf(),
        file_name: upload.file_name.clone(),
        mime_type: upload.mime_type.clone(),
        size_bytes: upload.size_bytes,
        document_id,
        node_id,
        title: upload.field("title").map(str::to_string),
        changelog: upload.field("changelog").map(str::to_string),
    };

    let job_id = state.intake.enqueue(principal, request).await?;
    let _ = upload.file.keep();

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(AcceptedJobResponse::new(job_id))),
    ))
}

/// GET /api/documents/{id}
pub async fn get_document(
    State(state): State<AppState>,
    _principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DocumentResponse>>, ApiError> {
    let document_id: DocumentId = parse_id(&id, "document id")?;
    let document = state.engine.get_document(document_id).await?;
    Ok(Json(ApiResponse::ok(document.into())))
}

/// GET /api/documents/{id}/versions
pub async fn list_versions(
    State(state): State<AppState>,
    _principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<VersionResponse>>>, ApiError> {
    let document_id: DocumentId = parse_id(&id, "document id")?;
    let versions = state.engine.get_history(document_id).await?;
    Ok(Json(ApiResponse::ok(
        versions.into_iter().map(VersionResponse::from).collect(),
    )))
}

/// POST /api/documents/{id}/revert
pub async fn revert(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<RevertRequest>,
) -> Result<Json<ApiResponse<DocumentResponse>>, ApiError> {
    let document_id: DocumentId = parse_id(&id, "document id")?;
    let document = state
        .engine
        .revert(&principal, document_id, req.version_id)
        .await?;
    Ok(Json(ApiResponse::ok(document.into())))
}

/// DELETE /api/documents/{id}
pub async fn delete_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let document_id: DocumentId = parse_id(&id, "document id")?;
    state.engine.delete(&principal, document_id).await?;
    Ok(Json(ApiResponse::ok(MessageResponse {
        message: format!("Document {document_id} deleted"),
    })))
}

/// GET /api/documents/{id}/download
pub async fn download_latest(
    State(state): State<AppState>,
    _principal: Principal,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let document_id: DocumentId = parse_id(&id, "document id")?;
    let download = state.downloads.download(document_id).await?;
    stream_response(download)
}

/// GET /api/documents/{id}/versions/{number}/download
pub async fn download_version(
    State(state): State<AppState>,
    _principal: Principal,
    Path((id, number)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let document_id: DocumentId = parse_id(&id, "document id")?;
    let number: i32 = parse_id(&number, "version number")?;
    let download = state
        .downloads
        .download_version(document_id, number)
        .await?;
    stream_response(download)
}

fn stream_response(download: Download) -> Result<Response, ApiError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&download.file_name),
        )
        .header(header::CONTENT_LENGTH, download.size_bytes)
        .body(Body::from_stream(download.stream))
        .map_err(|e| ApiError(AppError::internal(format!("Response build failed: {e}"))))
}

/// `attachment` disposition with a header-safe quoted file name.
fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}
