use chrono::{DateTime, Utc};
use deadpool_postgres::PoolError;
use tokio_postgres::types::Json;
use tokio_postgres::Error as PgError;
use tokio_postgres::Row;
use tracing::instrument;
use uuid::Uuid;

use crate::db::PgPool;
use crate::jobs::{PredictionRecord, PredictionStatus, PrincipalId};
use crate::order::OrderRecord;
use crate::risk::RiskLevel;

#[derive(Debug, thiserror::Error)]
pub enum PredictionStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map prediction row: {0}")]
    Mapping(String),
}

/// One stored prediction as returned to the dashboard, batch or not.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredPrediction {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: PredictionRecord,
}

/// Persist a single ad-hoc prediction (no batch job attached).
#[instrument(skip(pool, record))]
pub async fn insert_prediction(
    pool: &PgPool,
    principal: PrincipalId,
    record: &PredictionRecord,
) -> Result<Uuid, PredictionStorageError> {
    let client = pool.get().await?;

    let id = Uuid::new_v4();
    let payload = serde_json::to_value(&record.order)
        .map_err(|e| PredictionStorageError::Mapping(e.to_string()))?;

    client
        .execute(
            "INSERT INTO rr.predictions (
                id, job_id, principal_id, row_number, order_id, order_payload,
                status, return_probability, risk_level, confidence,
                model_version, error_message
            ) VALUES ($1, NULL, $2, NULL, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &id,
                &principal,
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

    Ok(id)
}

fn row_to_stored(row: &Row) -> Result<StoredPrediction, PredictionStorageError> {
    let payload: serde_json::Value = row.try_get("order_payload")?;
    let order: OrderRecord = serde_json::from_value(payload)
        .map_err(|e| PredictionStorageError::Mapping(e.to_string()))?;

    let status_raw: String = row.try_get("status")?;
    let status = PredictionStatus::parse(&status_raw).ok_or_else(|| {
        PredictionStorageError::Mapping(format!("unknown prediction status: {status_raw}"))
    })?;

    let risk_level = row
        .try_get::<_, Option<String>>("risk_level")?
        .map(|raw| {
            RiskLevel::parse(&raw).ok_or_else(|| {
                PredictionStorageError::Mapping(format!("unknown risk_level: {raw}"))
            })
        })
        .transpose()?;

    Ok(StoredPrediction {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        created_at: row.try_get("created_at")?,
        record: PredictionRecord {
            order,
            status,
            return_probability: row.try_get("return_probability")?,
            risk_level,
            confidence: row.try_get("confidence")?,
            model_version: row.try_get("model_version")?,
            error_message: row.try_get("error_message")?,
        },
    })
}

/// Latest predictions for one principal, newest first. Results are
/// scoped by principal so callers never see another tenant's orders.
#[instrument(skip(pool))]
pub async fn recent_predictions(
    pool: &PgPool,
    principal: PrincipalId,
    limit: i64,
) -> Result<Vec<StoredPrediction>, PredictionStorageError> {
    let client = pool.get().await?;

    let rows = client
        .query(
            "SELECT id, job_id, created_at, order_id, order_payload, status,
                    return_probability, risk_level, confidence, model_version, error_message
             FROM rr.predictions
             WHERE principal_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
            &[&principal, &limit.clamp(1, 500)],
        )
        .await?;

    rows.iter().map(row_to_stored).collect()
}
