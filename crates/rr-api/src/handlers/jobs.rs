use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rr_common::export::{export_results, ExportError, ExportFormat};
use rr_common::jobs::{JobId, ProcessingStatus, RowOutcome, UploadStatus};

use super::uploads::ensure_owner;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::SharedState;

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub filename: String,
    pub upload_status: UploadStatus,
    pub processing_status: ProcessingStatus,
    pub row_count: u32,
    pub invalid_rows: u32,
    pub rows_terminal: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub async fn get_job(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<JobId>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.store.fetch_job(id).await?;
    ensure_owner(job.principal, &auth, id)?;

    let snapshot = state.store.fetch_snapshot(id).await?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        filename: job.filename,
        upload_status: job.upload_status,
        processing_status: job.processing_status,
        row_count: job.row_count,
        invalid_rows: job.invalid_row_count,
        rows_terminal: snapshot.rows_terminal,
        error_message: job.error_message,
        created_at: job.created_at,
        finished_at: job.finished_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct JobResultsResponse {
    pub job_id: JobId,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub rows: Vec<RowOutcome>,
}

/// Row-level results once the job is terminal. A FAILED job still
/// returns whatever outcomes were persisted before the failure, next
/// to its reason; in-flight jobs answer 409 so dashboards keep polling
/// the status endpoint instead.
pub async fn get_results(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<JobId>,
) -> Result<Json<JobResultsResponse>, ApiError> {
    let job = state.store.fetch_job(id).await?;
    ensure_owner(job.principal, &auth, id)?;

    if !job.processing_status.is_terminal() {
        return Err(ExportError::JobNotReady(job.processing_status).into());
    }

    let mut rows = state.store.fetch_outcomes(id).await?;
    rows.sort_by_key(|outcome| outcome.row);

    Ok(Json(JobResultsResponse {
        job_id: id,
        processing_status: job.processing_status,
        error_message: job.error_message,
        rows,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub format: String,
}

pub async fn download_results(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<JobId>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let format = ExportFormat::parse(&params.format).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "unsupported format: {} (expected csv or json)",
            params.format
        ))
    })?;

    let job = state.store.fetch_job(id).await?;
    ensure_owner(job.principal, &auth, id)?;

    let outcomes = state.store.fetch_outcomes(id).await?;
    let body = export_results(&job, &outcomes, format)?;

    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        job.id,
        format.extension()
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
