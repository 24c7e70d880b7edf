//! Scan endpoints: request a scan, read its job status, cancel it.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scan_engine::{cancel_scan, enqueue_scan, scan_status, JobStatusView, NewScan, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::server::app::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("no scan job found for scan {0}")]
    NotFound(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Store(e) => {
                tracing::error!(error = %e, "store error in scan route");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            ApiError::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateScanResponse {
    pub scan_id: Uuid,
    pub job_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelScanRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelScanResponse {
    pub cancelled: bool,
}

/// `POST /scans` - create a scan and its pending job.
pub async fn create_scan_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<NewScan>,
) -> Result<(StatusCode, Json<CreateScanResponse>), ApiError> {
    if request.domain.trim().is_empty() {
        return Err(ApiError::BadRequest("domain is required".into()));
    }
    if request.business_name.trim().is_empty() {
        return Err(ApiError::BadRequest("business_name is required".into()));
    }

    let (scan, job) = enqueue_scan(state.store.as_ref(), request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateScanResponse {
            scan_id: scan.id,
            job_id: job.id,
        }),
    ))
}

/// `GET /scans/:id/status` - the job's current step, progress and retry state.
pub async fn scan_status_handler(
    Extension(state): Extension<AppState>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<JobStatusView>, ApiError> {
    scan_status(state.store.as_ref(), scan_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(scan_id))
}

/// `POST /scans/:id/cancel` - mark the job failed unless it is already terminal.
pub async fn cancel_scan_handler(
    Extension(state): Extension<AppState>,
    Path(scan_id): Path<Uuid>,
    body: Option<Json<CancelScanRequest>>,
) -> Result<Json<CancelScanResponse>, ApiError> {
    let Some(view) = scan_status(state.store.as_ref(), scan_id).await? else {
        return Err(ApiError::NotFound(scan_id));
    };
    if view.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "scan job is already {}",
            view.status.as_str()
        )));
    }

    let reason = body
        .and_then(|Json(request)| request.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "cancelled by user".to_string());
    if !cancel_scan(state.store.as_ref(), scan_id, &reason).await? {
        return Err(ApiError::Conflict("scan job finished before it could be cancelled".into()));
    }
    Ok(Json(CancelScanResponse { cancelled: true }))
}
