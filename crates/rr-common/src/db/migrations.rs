use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;
use tracing::{info, instrument};

use crate::db::{DbPoolError, PgPool};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to run migration: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to build pool: {0}")]
    PoolBuild(#[from] DbPoolError),
}

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    id: 1,
    description: "batch jobs, predictions and row error tables",
    sql: r#"
CREATE TABLE IF NOT EXISTS rr.batch_jobs (
    id UUID PRIMARY KEY,
    principal_id UUID NOT NULL,
    filename TEXT NOT NULL,
    upload_status TEXT NOT NULL,
    processing_status TEXT NOT NULL,
    row_count INTEGER NOT NULL CHECK (row_count >= 0),
    invalid_row_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    processing_started_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_batch_jobs_principal
    ON rr.batch_jobs(principal_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_batch_jobs_processing
    ON rr.batch_jobs(processing_started_at)
    WHERE processing_status = 'PROCESSING';

CREATE TABLE IF NOT EXISTS rr.predictions (
    id UUID PRIMARY KEY,
    job_id UUID REFERENCES rr.batch_jobs(id),
    principal_id UUID NOT NULL,
    row_number INTEGER,
    order_id TEXT,
    order_payload JSONB NOT NULL,
    status TEXT NOT NULL,
    return_probability DOUBLE PRECISION
        CHECK (return_probability IS NULL
            OR (return_probability >= 0.0 AND return_probability <= 1.0)),
    risk_level TEXT,
    confidence DOUBLE PRECISION
        CHECK (confidence IS NULL OR (confidence >= 0.0 AND confidence <= 1.0)),
    model_version TEXT,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_predictions_job_row
    ON rr.predictions(job_id, row_number)
    WHERE job_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_predictions_principal
    ON rr.predictions(principal_id, created_at DESC);

CREATE TABLE IF NOT EXISTS rr.batch_row_errors (
    job_id UUID NOT NULL REFERENCES rr.batch_jobs(id),
    row_number INTEGER NOT NULL,
    message TEXT NOT NULL,
    PRIMARY KEY (job_id, row_number)
);
"#,
}];

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE SCHEMA IF NOT EXISTS rr;
             CREATE TABLE IF NOT EXISTS rr.schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM rr.schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO rr.schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}
