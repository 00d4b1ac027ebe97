//! Import job handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use hopper_core::job::{
    JobId, JobStatusResponse, TriggerProcessingRequest, TriggerProcessingResponse,
};

/// POST /api/import/process - Start processing an assembled file.
///
/// Returns 202 with a new job, or 200 with the job already active for the file.
#[tracing::instrument(skip(state, body))]
pub async fn trigger_processing(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<TriggerProcessingResponse>)> {
    let request: TriggerProcessingRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;

    let started = state.processor.start(request.file_id).await?;
    let status = if started.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(TriggerProcessingResponse {
            success: true,
            job_id: started.job_id,
        }),
    ))
}

/// GET /api/import/status/{job_id} - Poll a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = JobId::parse(&job_id)?;
    let snapshot = state
        .processor
        .snapshot(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("import job {job_id} not found")))?;

    Ok(Json(JobStatusResponse::from_snapshot(
        snapshot,
        state.config.import.max_errors_surfaced,
    )))
}
