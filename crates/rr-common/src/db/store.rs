use async_trait::async_trait;

use crate::db::batch_jobs::{self, JobStorageError};
use crate::db::PgPool;
use crate::jobs::store::{JobStore, StoreError};
use crate::jobs::{BatchJob, JobId, JobSnapshot, RowOutcome, RowOutcomeKind};
use crate::poll::{StatusFetchError, StatusSource};

impl From<JobStorageError> for StoreError {
    fn from(err: JobStorageError) -> Self {
        match err {
            JobStorageError::NotFound(message) => {
                StoreError::Unavailable(format!("missing job: {message}"))
            }
            JobStorageError::Conflict(message) => StoreError::InvalidTransition(message),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Postgres-backed job store. All semantics (monotonic transitions,
/// first-write-wins rows, guarded completion) live in the SQL helpers;
/// this type only adapts them to the trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(
        &self,
        job: BatchJob,
        seed_outcomes: Vec<RowOutcome>,
    ) -> Result<(), StoreError> {
        let row_errors: Vec<crate::ingest::RowError> = seed_outcomes
            .into_iter()
            .filter_map(|outcome| match outcome.kind {
                RowOutcomeKind::Invalid { message } => Some(crate::ingest::RowError {
                    line: outcome.row,
                    message,
                }),
                RowOutcomeKind::Scored(_) => None,
            })
            .collect();

        batch_jobs::insert_job(&self.pool, &job, &row_errors).await?;
        Ok(())
    }

    async fn fetch_job(&self, id: JobId) -> Result<BatchJob, StoreError> {
        batch_jobs::fetch_job(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn mark_processing(&self, id: JobId) -> Result<(), StoreError> {
        match batch_jobs::mark_processing(&self.pool, id).await {
            Ok(()) => Ok(()),
            Err(JobStorageError::NotFound(_)) => Err(StoreError::NotFound(id)),
            Err(other) => Err(other.into()),
        }
    }

    async fn record_row_outcome(
        &self,
        id: JobId,
        outcome: RowOutcome,
    ) -> Result<bool, StoreError> {
        let job = self.fetch_job(id).await?;

        match outcome.kind {
            RowOutcomeKind::Scored(record) => Ok(batch_jobs::record_prediction_row(
                &self.pool,
                id,
                job.principal,
                outcome.row,
                &record,
            )
            .await?),
            // Parse errors are normally seeded at create time; writing
            // one later is still first-write-wins.
            RowOutcomeKind::Invalid { message } => {
                let client = self
                    .pool
                    .get()
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                let inserted = client
                    .execute(
                        "INSERT INTO rr.batch_row_errors (job_id, row_number, message)
                         VALUES ($1, $2, $3)
                         ON CONFLICT (job_id, row_number) DO NOTHING",
                        &[
                            &id,
                            &i32::try_from(outcome.row).unwrap_or(i32::MAX),
                            &message,
                        ],
                    )
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                Ok(inserted == 1)
            }
        }
    }

    async fn fetch_outcomes(&self, id: JobId) -> Result<Vec<RowOutcome>, StoreError> {
        Ok(batch_jobs::fetch_outcomes(&self.pool, id).await?)
    }

    async fn complete_job(&self, id: JobId) -> Result<(), StoreError> {
        match batch_jobs::complete_job(&self.pool, id).await {
            Ok(()) => Ok(()),
            Err(JobStorageError::NotFound(_)) => Err(StoreError::NotFound(id)),
            Err(other) => Err(other.into()),
        }
    }

    async fn fail_job(&self, id: JobId, reason: &str) -> Result<(), StoreError> {
        match batch_jobs::fail_job(&self.pool, id, reason).await {
            Ok(()) => Ok(()),
            Err(JobStorageError::NotFound(_)) => Err(StoreError::NotFound(id)),
            Err(other) => Err(other.into()),
        }
    }

    async fn fetch_snapshot(&self, id: JobId) -> Result<JobSnapshot, StoreError> {
        batch_jobs::fetch_snapshot(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl StatusSource for PgStore {
    async fn fetch_status(&self, id: JobId) -> Result<JobSnapshot, StatusFetchError> {
        match batch_jobs::fetch_snapshot(&self.pool, id).await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Err(StatusFetchError::NotFound(id)),
            // Pool and query errors are transient from the poller's
            // point of view; the next tick retries.
            Err(err) => Err(StatusFetchError::Transient(err.to_string())),
        }
    }
}
