use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::jobs::store::{JobStore, MemoryStore, StoreError};
use crate::jobs::{JobId, JobSnapshot, ProcessingStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_MAX_WAIT: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum StatusFetchError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("status fetch failed: {0}")]
    Transient(String),
}

/// Read side of job status, as seen by a poller.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, id: JobId) -> Result<JobSnapshot, StatusFetchError>;
}

#[async_trait]
impl StatusSource for MemoryStore {
    async fn fetch_status(&self, id: JobId) -> Result<JobSnapshot, StatusFetchError> {
        self.fetch_snapshot(id).await.map_err(|err| match err {
            StoreError::NotFound(id) => StatusFetchError::NotFound(id),
            other => StatusFetchError::Transient(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Fixed delay between status checks. No backoff: the dashboard
    /// wants a steady cadence.
    pub interval: Duration,
    /// Give up waiting after this long; the job itself keeps running.
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_POLL_MAX_WAIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(JobSnapshot),
    Failed { message: String },
    Cancelled,
    TimedOut,
}

/// Poll a job at a fixed interval until it reaches a terminal state,
/// the caller cancels, or the wait budget runs out. Transient fetch
/// errors are logged and skipped; the next tick retries.
#[instrument(skip(source, cancel))]
pub async fn poll_job(
    source: &dyn StatusSource,
    id: JobId,
    config: PollConfig,
    cancel: CancellationToken,
) -> PollOutcome {
    let deadline = tokio::time::Instant::now() + config.max_wait;
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => return PollOutcome::TimedOut,
            _ = ticker.tick() => {}
        }

        match source.fetch_status(id).await {
            Ok(snapshot) => match snapshot.processing_status {
                ProcessingStatus::Completed => return PollOutcome::Completed(snapshot),
                ProcessingStatus::Failed => {
                    return PollOutcome::Failed {
                        message: snapshot
                            .error_message
                            .unwrap_or_else(|| "job failed".to_string()),
                    }
                }
                ProcessingStatus::Pending | ProcessingStatus::Processing => {}
            },
            Err(StatusFetchError::NotFound(id)) => {
                return PollOutcome::Failed {
                    message: format!("job {id} not found"),
                }
            }
            Err(StatusFetchError::Transient(message)) => {
                warn!(%id, %message, "status check failed, retrying next tick");
            }
        }
    }
}
