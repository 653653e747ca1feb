use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::PoolError;
use tokio_postgres::types::Json;
use tokio_postgres::Error as PgError;
use tokio_postgres::Row;
use tracing::instrument;
use uuid::Uuid;

use crate::db::PgPool;
use crate::ingest::RowError;
use crate::jobs::{
    BatchJob, JobId, JobSnapshot, PredictionRecord, PredictionStatus, ProcessingStatus,
    RowOutcome, RowOutcomeKind, UploadStatus,
};
use crate::order::OrderRecord;
use crate::risk::RiskLevel;

#[derive(Debug, thiserror::Error)]
pub enum JobStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map job row: {0}")]
    Mapping(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

fn parse_processing_status(value: &str) -> Result<ProcessingStatus, JobStorageError> {
    ProcessingStatus::parse(value)
        .ok_or_else(|| JobStorageError::Mapping(format!("unknown processing_status: {value}")))
}

fn parse_upload_status(value: &str) -> Result<UploadStatus, JobStorageError> {
    UploadStatus::parse(value)
        .ok_or_else(|| JobStorageError::Mapping(format!("unknown upload_status: {value}")))
}

fn parse_prediction_status(value: &str) -> Result<PredictionStatus, JobStorageError> {
    PredictionStatus::parse(value)
        .ok_or_else(|| JobStorageError::Mapping(format!("unknown prediction status: {value}")))
}

fn row_to_job(row: &Row) -> Result<BatchJob, JobStorageError> {
    Ok(BatchJob {
        id: row.try_get("id")?,
        principal: row.try_get("principal_id")?,
        filename: row.try_get("filename")?,
        upload_status: parse_upload_status(row.try_get::<_, String>("upload_status")?.as_str())?,
        processing_status: parse_processing_status(
            row.try_get::<_, String>("processing_status")?.as_str(),
        )?,
        row_count: row
            .try_get::<_, i32>("row_count")
            .map_err(JobStorageError::from)
            .and_then(|v| {
                u32::try_from(v).map_err(|e| JobStorageError::Mapping(e.to_string()))
            })?,
        invalid_row_count: row
            .try_get::<_, i32>("invalid_row_count")
            .map_err(JobStorageError::from)
            .and_then(|v| {
                u32::try_from(v).map_err(|e| JobStorageError::Mapping(e.to_string()))
            })?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        processing_started_at: row.try_get("processing_started_at")?,
        finished_at: row.try_get("finished_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const JOB_COLUMNS: &str = "id, principal_id, filename, upload_status, processing_status, \
     row_count, invalid_row_count, error_message, created_at, processing_started_at, \
     finished_at, updated_at";

/// Insert a freshly created job and its parse-error rows in one
/// transaction, so a job is never visible without its seed errors.
#[instrument(skip(pool, job, row_errors))]
pub async fn insert_job(
    pool: &PgPool,
    job: &BatchJob,
    row_errors: &[RowError],
) -> Result<(), JobStorageError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    tx.execute(
        "INSERT INTO rr.batch_jobs (
            id, principal_id, filename, upload_status, processing_status,
            row_count, invalid_row_count, error_message, created_at,
            processing_started_at, finished_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        &[
            &job.id,
            &job.principal,
            &job.filename,
            &job.upload_status.as_str(),
            &job.processing_status.as_str(),
            &i32::try_from(job.row_count).unwrap_or(i32::MAX),
            &i32::try_from(job.invalid_row_count).unwrap_or(i32::MAX),
            &job.error_message,
            &job.created_at,
            &job.processing_started_at,
            &job.finished_at,
            &job.updated_at,
        ],
    )
    .await?;

    for error in row_errors {
        tx.execute(
            "INSERT INTO rr.batch_row_errors (job_id, row_number, message)
             VALUES ($1, $2, $3)
             ON CONFLICT (job_id, row_number) DO NOTHING",
            &[
                &job.id,
                &i32::try_from(error.line).unwrap_or(i32::MAX),
                &error.message,
            ],
        )
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn fetch_job(pool: &PgPool, id: JobId) -> Result<Option<BatchJob>, JobStorageError> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            &format!("SELECT {JOB_COLUMNS} FROM rr.batch_jobs WHERE id = $1"),
            &[&id],
        )
        .await?;
    row.map(|r| row_to_job(&r)).transpose()
}

/// Compare-and-set PENDING -> PROCESSING. Already being PROCESSING is
/// fine; any terminal state is a conflict.
#[instrument(skip(pool))]
pub async fn mark_processing(pool: &PgPool, id: JobId) -> Result<(), JobStorageError> {
    let client = pool.get().await?;
    let now = Utc::now();

    let updated = client
        .execute(
            "UPDATE rr.batch_jobs SET
                processing_status = 'PROCESSING',
                processing_started_at = $2,
                updated_at = $2
            WHERE id = $1 AND processing_status = 'PENDING'",
            &[&id, &now],
        )
        .await?;

    if updated == 1 {
        return Ok(());
    }

    match fetch_job(pool, id).await? {
        None => Err(JobStorageError::NotFound(format!("job {id} not found"))),
        Some(job) if job.processing_status == ProcessingStatus::Processing => Ok(()),
        Some(job) => Err(JobStorageError::Conflict(format!(
            "job {id} is {} and cannot start processing",
            job.processing_status
        ))),
    }
}

/// Write one scored row. The partial unique index on (job_id,
/// row_number) makes retried writes no-ops; the first write wins.
#[instrument(skip(pool, record))]
pub async fn record_prediction_row(
    pool: &PgPool,
    job_id: JobId,
    principal: Uuid,
    row_number: u32,
    record: &PredictionRecord,
) -> Result<bool, JobStorageError> {
    let client = pool.get().await?;

    let payload = serde_json::to_value(&record.order)
        .map_err(|e| JobStorageError::Mapping(e.to_string()))?;

    let inserted = client
        .execute(
            "INSERT INTO rr.predictions (
                id, job_id, principal_id, row_number, order_id, order_payload,
                status, return_probability, risk_level, confidence,
                model_version, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (job_id, row_number) WHERE job_id IS NOT NULL DO NOTHING",
            &[
                &Uuid::new_v4(),
                &job_id,
                &principal,
                &i32::try_from(row_number).unwrap_or(i32::MAX),
                &record.order.order_id,
                &Json(&payload),
                &record.status.as_str(),
                &record.return_probability,
                &record.risk_level.map(|level| level.as_str()),
                &record.confidence,
                &record.model_version,
                &record.error_message,
            ],
        )
        .await?;

    Ok(inserted == 1)
}

fn row_to_prediction(row: &Row) -> Result<PredictionRecord, JobStorageError> {
    let payload: serde_json::Value = row.try_get("order_payload")?;
    let order: OrderRecord = serde_json::from_value(payload)
        .map_err(|e| JobStorageError::Mapping(e.to_string()))?;

    let risk_level = row
        .try_get::<_, Option<String>>("risk_level")?
        .map(|raw| {
            RiskLevel::parse(&raw)
                .ok_or_else(|| JobStorageError::Mapping(format!("unknown risk_level: {raw}")))
        })
        .transpose()?;

    Ok(PredictionRecord {
        order,
        status: parse_prediction_status(row.try_get::<_, String>("status")?.as_str())?,
        return_probability: row.try_get("return_probability")?,
        risk_level,
        confidence: row.try_get("confidence")?,
        model_version: row.try_get("model_version")?,
        error_message: row.try_get("error_message")?,
    })
}

/// Scored rows and parse-error rows merged into one row-ordered list.
#[instrument(skip(pool))]
pub async fn fetch_outcomes(
    pool: &PgPool,
    job_id: JobId,
) -> Result<Vec<RowOutcome>, JobStorageError> {
    let client = pool.get().await?;

    let prediction_rows = client
        .query(
            "SELECT row_number, order_id, order_payload, status, return_probability,
                    risk_level, confidence, model_version, error_message
             FROM rr.predictions WHERE job_id = $1",
            &[&job_id],
        )
        .await?;

    let error_rows = client
        .query(
            "SELECT row_number, message FROM rr.batch_row_errors WHERE job_id = $1",
            &[&job_id],
        )
        .await?;

    let mut outcomes = Vec::with_capacity(prediction_rows.len() + error_rows.len());

    for row in &prediction_rows {
        let row_number: i32 = row.try_get("row_number")?;
        outcomes.push(RowOutcome {
            row: u32::try_from(row_number)
                .map_err(|e| JobStorageError::Mapping(e.to_string()))?,
            kind: RowOutcomeKind::Scored(row_to_prediction(row)?),
        });
    }

    for row in &error_rows {
        let row_number: i32 = row.try_get("row_number")?;
        outcomes.push(RowOutcome {
            row: u32::try_from(row_number)
                .map_err(|e| JobStorageError::Mapping(e.to_string()))?,
            kind: RowOutcomeKind::Invalid {
                message: row.try_get("message")?,
            },
        });
    }

    outcomes.sort_by_key(|outcome| outcome.row);
    Ok(outcomes)
}

/// Compare-and-set PROCESSING -> COMPLETED, guarded by the terminal
/// row count so a job can never complete with open rows.
#[instrument(skip(pool))]
pub async fn complete_job(pool: &PgPool, id: JobId) -> Result<(), JobStorageError> {
    let client = pool.get().await?;
    let now = Utc::now();

    let updated = client
        .execute(
            "UPDATE rr.batch_jobs SET
                processing_status = 'COMPLETED',
                finished_at = $2,
                updated_at = $2
            WHERE id = $1
              AND processing_status = 'PROCESSING'
              AND row_count = (
                (SELECT COUNT(*) FROM rr.predictions WHERE job_id = $1)
                + (SELECT COUNT(*) FROM rr.batch_row_errors WHERE job_id = $1)
              )",
            &[&id, &now],
        )
        .await?;

    if updated == 1 {
        return Ok(());
    }

    match fetch_job(pool, id).await? {
        None => Err(JobStorageError::NotFound(format!("job {id} not found"))),
        Some(job) if job.processing_status == ProcessingStatus::Completed => Ok(()),
        Some(job) if job.processing_status == ProcessingStatus::Processing => Err(
            JobStorageError::Conflict(format!("job {id} still has open rows")),
        ),
        Some(job) => Err(JobStorageError::Conflict(format!(
            "job {id} is {} and cannot complete",
            job.processing_status
        ))),
    }
}

/// Force a job to FAILED from any non-terminal state.
#[instrument(skip(pool))]
pub async fn fail_job(pool: &PgPool, id: JobId, reason: &str) -> Result<(), JobStorageError> {
    let client = pool.get().await?;
    let now = Utc::now();

    let updated = client
        .execute(
            "UPDATE rr.batch_jobs SET
                processing_status = 'FAILED',
                error_message = $2,
                finished_at = $3,
                updated_at = $3
            WHERE id = $1 AND processing_status IN ('PENDING', 'PROCESSING')",
            &[&id, &reason, &now],
        )
        .await?;

    if updated == 1 {
        return Ok(());
    }

    match fetch_job(pool, id).await? {
        None => Err(JobStorageError::NotFound(format!("job {id} not found"))),
        // Terminal already; failing twice must not flip a COMPLETED job.
        Some(job) if job.processing_status == ProcessingStatus::Failed => Ok(()),
        Some(job) => Err(JobStorageError::Conflict(format!(
            "job {id} is {} and cannot fail",
            job.processing_status
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn fetch_snapshot(
    pool: &PgPool,
    id: JobId,
) -> Result<Option<JobSnapshot>, JobStorageError> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            "SELECT j.id, j.upload_status, j.processing_status, j.row_count, j.error_message,
                (SELECT COUNT(*) FROM rr.predictions WHERE job_id = j.id)
                + (SELECT COUNT(*) FROM rr.batch_row_errors WHERE job_id = j.id)
                    AS rows_terminal
             FROM rr.batch_jobs j WHERE j.id = $1",
            &[&id],
        )
        .await?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(JobSnapshot {
        id: row.try_get("id")?,
        processing_status: parse_processing_status(
            row.try_get::<_, String>("processing_status")?.as_str(),
        )?,
        upload_status: parse_upload_status(row.try_get::<_, String>("upload_status")?.as_str())?,
        row_count: row
            .try_get::<_, i32>("row_count")
            .map_err(JobStorageError::from)
            .and_then(|v| {
                u32::try_from(v).map_err(|e| JobStorageError::Mapping(e.to_string()))
            })?,
        rows_terminal: row
            .try_get::<_, i64>("rows_terminal")
            .map_err(JobStorageError::from)
            .and_then(|v| {
                u32::try_from(v).map_err(|e| JobStorageError::Mapping(e.to_string()))
            })?,
        error_message: row.try_get("error_message")?,
    }))
}

/// Fail PROCESSING jobs whose wall-clock budget has elapsed. Unlike a
/// retrying recovery sweep, these jobs stay FAILED: the upload can be
/// re-submitted but a stuck job never restarts.
#[instrument(skip(pool))]
pub async fn fail_timed_out_jobs(
    pool: &PgPool,
    now: DateTime<Utc>,
    budget: Duration,
) -> Result<u64, JobStorageError> {
    let client = pool.get().await?;
    let cutoff = now - budget;

    let rows = client
        .execute(
            "UPDATE rr.batch_jobs SET
                processing_status = 'FAILED',
                error_message = 'processing time budget exceeded',
                finished_at = $1,
                updated_at = $1
            WHERE processing_status = 'PROCESSING'
              AND COALESCE(processing_started_at, created_at) <= $2",
            &[&now, &cutoff],
        )
        .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsers_reject_unknown_values() {
        assert!(parse_processing_status("PENDING").is_ok());
        assert!(parse_processing_status("PROCESSING").is_ok());
        assert!(parse_processing_status("COMPLETED").is_ok());
        assert!(parse_processing_status("FAILED").is_ok());
        let err = parse_processing_status("RUNNING").unwrap_err();
        assert!(format!("{err}").contains("unknown processing_status"));

        assert!(parse_upload_status("VALID").is_ok());
        assert!(parse_upload_status("valid").is_err());

        assert!(parse_prediction_status("COMPLETED").is_ok());
        assert!(parse_prediction_status("INVALID").is_err());
    }
}
