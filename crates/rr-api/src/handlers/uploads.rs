use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use rr_common::ingest::{self, RowError};
use rr_common::jobs::orchestrator::spawn_job;
use rr_common::jobs::{job_from_parse, JobId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::SharedState;

#[derive(Debug, Serialize)]
pub struct UploadAck {
    pub job_id: JobId,
    pub row_count: u32,
    pub invalid_rows: u32,
    pub row_errors: Vec<RowError>,
}

/// Accept a batch file, validate it and enqueue a scoring job. The
/// response is a 202: scoring happens in the background and the caller
/// polls the job id.
pub async fn upload_batch(
    State(state): State<SharedState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAck>), ApiError> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(format!("could not read upload: {err}")))?;

        upload = Some((filename, content_type, bytes.to_vec()));
        break;
    }

    let (filename, content_type, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("multipart field 'file' is required".into()))?;

    let parsed = ingest::parse(&bytes, &content_type, &filename)?;

    if parsed.total_rows == 0 {
        return Err(ApiError::BadRequest("upload contains no data rows".into()));
    }

    // Nothing to score means no job: surface the row errors instead of
    // creating a job that can only fail.
    if parsed.valid_rows.is_empty() {
        let preview = parsed
            .row_errors
            .iter()
            .take(5)
            .map(|error| format!("row {}: {}", error.line, error.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ApiError::BadRequest(format!(
            "no valid rows in upload ({preview})"
        )));
    }

    let (job, seed_outcomes) = job_from_parse(auth.principal, &filename, &parsed);
    let ack = UploadAck {
        job_id: job.id,
        row_count: job.row_count,
        invalid_rows: job.invalid_row_count,
        row_errors: parsed.row_errors.clone(),
    };

    state.store.create_job(job.clone(), seed_outcomes).await?;

    info!(
        job_id = %job.id,
        principal = %auth.principal,
        rows = job.row_count,
        invalid = job.invalid_row_count,
        "batch upload accepted"
    );

    spawn_job(
        Arc::clone(&state.store),
        Arc::clone(&state.scorer),
        job,
        parsed.valid_rows,
        state.orchestrator,
    );

    Ok((StatusCode::ACCEPTED, Json(ack)))
}

/// Owner check shared by the job read endpoints. A mismatch reads the
/// same as a missing job so ids cannot be probed across tenants.
pub(crate) fn ensure_owner(job_principal: Uuid, auth: &AuthUser, id: JobId) -> Result<(), ApiError> {
    if job_principal != auth.principal {
        return Err(ApiError::NotFound(format!("job {id} not found")));
    }
    Ok(())
}
