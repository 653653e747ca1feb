use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::ledger::{JobLedger, LedgerError};
use super::{BatchJob, JobId, JobSnapshot, ProcessingStatus, RowOutcome};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<LedgerError> for StoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => StoreError::NotFound(id),
            other => StoreError::InvalidTransition(other.to_string()),
        }
    }
}

/// Persistence seam for batch jobs. The API and orchestrator only talk
/// to this trait, so the same pipeline runs against postgres in
/// production and the in-memory ledger in tests.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(
        &self,
        job: BatchJob,
        seed_outcomes: Vec<RowOutcome>,
    ) -> Result<(), StoreError>;

    async fn fetch_job(&self, id: JobId) -> Result<BatchJob, StoreError>;

    async fn mark_processing(&self, id: JobId) -> Result<(), StoreError>;

    /// Idempotent terminal write for one row. Returns `false` when the
    /// row already had an outcome.
    async fn record_row_outcome(
        &self,
        id: JobId,
        outcome: RowOutcome,
    ) -> Result<bool, StoreError>;

    async fn fetch_outcomes(&self, id: JobId) -> Result<Vec<RowOutcome>, StoreError>;

    /// Complete the job, refusing while any row is still open.
    async fn complete_job(&self, id: JobId) -> Result<(), StoreError>;

    async fn fail_job(&self, id: JobId, reason: &str) -> Result<(), StoreError>;

    async fn fetch_snapshot(&self, id: JobId) -> Result<JobSnapshot, StoreError>;
}

/// Ledger-backed store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryStore {
    ledger: RwLock<JobLedger>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(
        &self,
        job: BatchJob,
        seed_outcomes: Vec<RowOutcome>,
    ) -> Result<(), StoreError> {
        self.ledger.write().await.insert_job(job, seed_outcomes);
        Ok(())
    }

    async fn fetch_job(&self, id: JobId) -> Result<BatchJob, StoreError> {
        Ok(self.ledger.read().await.job(id)?.clone())
    }

    async fn mark_processing(&self, id: JobId) -> Result<(), StoreError> {
        self.ledger
            .write()
            .await
            .transition(id, ProcessingStatus::Processing, None)?;
        Ok(())
    }

    async fn record_row_outcome(
        &self,
        id: JobId,
        outcome: RowOutcome,
    ) -> Result<bool, StoreError> {
        Ok(self.ledger.write().await.record_outcome(id, outcome)?)
    }

    async fn fetch_outcomes(&self, id: JobId) -> Result<Vec<RowOutcome>, StoreError> {
        Ok(self.ledger.read().await.outcomes(id)?)
    }

    async fn complete_job(&self, id: JobId) -> Result<(), StoreError> {
        let mut ledger = self.ledger.write().await;
        if !ledger.all_rows_terminal(id)? {
            return Err(StoreError::InvalidTransition(format!(
                "job {id} still has open rows"
            )));
        }
        ledger.transition(id, ProcessingStatus::Completed, None)?;
        Ok(())
    }

    async fn fail_job(&self, id: JobId, reason: &str) -> Result<(), StoreError> {
        self.ledger.write().await.transition(
            id,
            ProcessingStatus::Failed,
            Some(reason.to_string()),
        )?;
        Ok(())
    }

    async fn fetch_snapshot(&self, id: JobId) -> Result<JobSnapshot, StoreError> {
        Ok(self.ledger.read().await.snapshot(id)?)
    }
}
