use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::store::{JobStore, StoreError};
use super::{BatchJob, PredictionRecord, ProcessingStatus, RowOutcome, RowOutcomeKind};
use crate::order::OrderRecord;
use crate::risk::RiskThresholds;
use crate::scoring::{ScoreError, Scorer};

pub const DEFAULT_PARALLELISM: usize = 4;
pub const DEFAULT_JOB_BUDGET_SECS: u64 = 600;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Rows scored concurrently within one job.
    pub parallelism: usize,
    /// Wall-clock budget after which a job is forced to FAILED.
    pub job_budget: Duration,
    pub thresholds: RiskThresholds,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            job_budget: Duration::from_secs(DEFAULT_JOB_BUDGET_SECS),
            thresholds: RiskThresholds::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let parallelism = std::env::var("RR_SCORING_PARALLELISM")
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|value| *value >= 1)
            .unwrap_or(DEFAULT_PARALLELISM);
        let job_budget = std::env::var("RR_JOB_BUDGET_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|value| *value >= 1)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_JOB_BUDGET_SECS));

        Self {
            parallelism,
            job_budget,
            thresholds: RiskThresholds::from_env(),
        }
    }
}

fn score_row(
    scorer: &dyn Scorer,
    thresholds: RiskThresholds,
    row: u32,
    order: OrderRecord,
) -> RowOutcome {
    let record = match scorer.score(&order) {
        Ok(score) => PredictionRecord::completed(
            order,
            score.return_probability,
            thresholds.bucket(score.return_probability),
            score.confidence,
            score.model_version,
        ),
        Err(ScoreError::Rejected(reason)) => PredictionRecord::failed(order, reason),
        Err(other) => PredictionRecord::failed(order, other.to_string()),
    };

    RowOutcome {
        row,
        kind: RowOutcomeKind::Scored(record),
    }
}

/// Score every valid row of a job and drive its status to a terminal
/// state. Row-level scoring failures become FAILED rows but do not
/// fail the job; only storage failures (or zero rows to score) do.
#[instrument(skip(store, scorer, rows, config), fields(job_id = %job.id, rows = rows.len()))]
pub async fn run_job(
    store: Arc<dyn JobStore>,
    scorer: Arc<dyn Scorer>,
    job: BatchJob,
    rows: Vec<(u32, OrderRecord)>,
    config: OrchestratorConfig,
) -> Result<ProcessingStatus, StoreError> {
    let job_id = job.id;

    if rows.is_empty() {
        warn!(%job_id, "job has no scoreable rows");
        store.fail_job(job_id, "no valid rows to score").await?;
        return Ok(ProcessingStatus::Failed);
    }

    store.mark_processing(job_id).await?;

    let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
    let mut tasks = JoinSet::new();

    for (row, order) in rows {
        let store = Arc::clone(&store);
        let scorer = Arc::clone(&scorer);
        let semaphore = Arc::clone(&semaphore);
        let thresholds = config.thresholds;

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| StoreError::Unavailable("scoring pool closed".to_string()))?;
            let outcome = score_row(scorer.as_ref(), thresholds, row, order);
            store.record_row_outcome(job_id, outcome).await
        });
    }

    let mut storage_failure: Option<StoreError> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(written)) => {
                if !written {
                    // Another writer got there first; the stored outcome stands.
                    info!(%job_id, "row outcome already recorded, skipping");
                }
            }
            Ok(Err(err)) => {
                error!(%job_id, error = %err, "row outcome write failed");
                storage_failure.get_or_insert(err);
            }
            Err(join_err) => {
                error!(%job_id, error = %join_err, "scoring task panicked");
                storage_failure
                    .get_or_insert(StoreError::Unavailable(join_err.to_string()));
            }
        }
    }

    if let Some(err) = storage_failure {
        // Best effort: the watchdog catches jobs this fail also misses.
        if let Err(fail_err) = store
            .fail_job(job_id, "storage failure while recording results")
            .await
        {
            error!(%job_id, error = %fail_err, "could not mark job failed");
        }
        return Err(err);
    }

    store.complete_job(job_id).await?;
    info!(%job_id, "job completed");
    Ok(ProcessingStatus::Completed)
}

/// Run a job in the background under its wall-clock budget. On timeout
/// the job is forced to FAILED so pollers are released.
pub fn spawn_job(
    store: Arc<dyn JobStore>,
    scorer: Arc<dyn Scorer>,
    job: BatchJob,
    rows: Vec<(u32, OrderRecord)>,
    config: OrchestratorConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let job_id = job.id;
        let budget = config.job_budget;
        let run = run_job(Arc::clone(&store), scorer, job, rows, config);

        match tokio::time::timeout(budget, run).await {
            Ok(Ok(status)) => info!(%job_id, %status, "job finished"),
            Ok(Err(err)) => error!(%job_id, error = %err, "job failed"),
            Err(_) => {
                warn!(%job_id, budget_secs = budget.as_secs(), "job exceeded its budget");
                if let Err(err) = store
                    .fail_job(job_id, "processing time budget exceeded")
                    .await
                {
                    error!(%job_id, error = %err, "could not fail over-budget job");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ParseResult, RowError};
    use crate::jobs::store::MemoryStore;
    use crate::jobs::{job_from_parse, JobId};
    use crate::order::{Gender, PaymentMethod, ProductCategory, ShippingMethod};
    use crate::scoring::{HeuristicScorer, Score};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn order(price: f64) -> OrderRecord {
        OrderRecord {
            order_id: None,
            category: ProductCategory::Clothing,
            price,
            quantity: 1,
            age: 30,
            gender: Gender::Female,
            location: "California".into(),
            payment_method: PaymentMethod::CreditCard,
            shipping_method: ShippingMethod::Standard,
            discount_percent: 0.0,
        }
    }

    fn parsed(valid: Vec<OrderRecord>, errors: Vec<RowError>) -> ParseResult {
        let total = valid.len() + errors.len();
        ParseResult {
            valid_rows: valid
                .into_iter()
                .enumerate()
                .map(|(index, order)| (index as u32 + 1, order))
                .collect(),
            row_errors: errors,
            total_rows: total as u32,
        }
    }

    #[tokio::test]
    async fn completes_with_a_mix_of_valid_and_invalid_rows() {
        let store = Arc::new(MemoryStore::new());
        let scorer = Arc::new(HeuristicScorer);

        let mut result = parsed(
            vec![order(80.0), order(25.0)],
            vec![RowError {
                line: 3,
                message: "invalid category: Furniture".into(),
            }],
        );
        result.total_rows = 3;

        let (job, seed) = job_from_parse(Uuid::new_v4(), "orders.csv", &result);
        let id = job.id;
        store.create_job(job.clone(), seed).await.unwrap();

        let status = run_job(
            Arc::clone(&store) as Arc<dyn JobStore>,
            scorer,
            job,
            result.valid_rows,
            OrchestratorConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(status, ProcessingStatus::Completed);

        let outcomes = store.fetch_outcomes(id).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0].kind, RowOutcomeKind::Scored(_)));
        assert!(matches!(outcomes[2].kind, RowOutcomeKind::Invalid { .. }));

        let snapshot = store.fetch_snapshot(id).await.unwrap();
        assert_eq!(snapshot.processing_status, ProcessingStatus::Completed);
        assert_eq!(snapshot.rows_terminal, 3);
    }

    #[tokio::test]
    async fn zero_scoreable_rows_fails_the_job() {
        let store = Arc::new(MemoryStore::new());
        let result = parsed(
            vec![],
            vec![RowError {
                line: 1,
                message: "price must be greater than zero".into(),
            }],
        );

        let (job, seed) = job_from_parse(Uuid::new_v4(), "orders.csv", &result);
        let id = job.id;
        store.create_job(job.clone(), seed).await.unwrap();

        let status = run_job(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::new(HeuristicScorer),
            job,
            vec![],
            OrchestratorConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(status, ProcessingStatus::Failed);
        let fetched = store.fetch_job(id).await.unwrap();
        assert_eq!(fetched.processing_status, ProcessingStatus::Failed);
        assert!(fetched.error_message.is_some());
    }

    /// Scorer that rejects every order, exercising row-level failure.
    struct RejectingScorer;

    impl Scorer for RejectingScorer {
        fn score(&self, _order: &OrderRecord) -> Result<Score, ScoreError> {
            Err(ScoreError::Rejected("model offline for this SKU".into()))
        }
    }

    #[tokio::test]
    async fn row_scoring_failures_do_not_fail_the_job() {
        let store = Arc::new(MemoryStore::new());
        let result = parsed(vec![order(80.0), order(25.0)], vec![]);

        let (job, seed) = job_from_parse(Uuid::new_v4(), "orders.csv", &result);
        let id = job.id;
        store.create_job(job.clone(), seed).await.unwrap();

        let status = run_job(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::new(RejectingScorer),
            job,
            result.valid_rows,
            OrchestratorConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(status, ProcessingStatus::Completed);
        for outcome in store.fetch_outcomes(id).await.unwrap() {
            match outcome.kind {
                RowOutcomeKind::Scored(record) => {
                    assert_eq!(record.status, crate::jobs::PredictionStatus::Failed);
                    assert!(record.error_message.is_some());
                    assert!(record.return_probability.is_none());
                }
                RowOutcomeKind::Invalid { .. } => panic!("no parse errors in this job"),
            }
        }
    }

    /// Store wrapper that fails every row write after the first N.
    struct FlakyStore {
        inner: MemoryStore,
        writes_allowed: AtomicU32,
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn create_job(
            &self,
            job: BatchJob,
            seed: Vec<RowOutcome>,
        ) -> Result<(), StoreError> {
            self.inner.create_job(job, seed).await
        }

        async fn fetch_job(&self, id: JobId) -> Result<BatchJob, StoreError> {
            self.inner.fetch_job(id).await
        }

        async fn mark_processing(&self, id: JobId) -> Result<(), StoreError> {
            self.inner.mark_processing(id).await
        }

        async fn record_row_outcome(
            &self,
            id: JobId,
            outcome: RowOutcome,
        ) -> Result<bool, StoreError> {
            if self.writes_allowed.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_err()
            {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.record_row_outcome(id, outcome).await
        }

        async fn fetch_outcomes(&self, id: JobId) -> Result<Vec<RowOutcome>, StoreError> {
            self.inner.fetch_outcomes(id).await
        }

        async fn complete_job(&self, id: JobId) -> Result<(), StoreError> {
            self.inner.complete_job(id).await
        }

        async fn fail_job(&self, id: JobId, reason: &str) -> Result<(), StoreError> {
            self.inner.fail_job(id, reason).await
        }

        async fn fetch_snapshot(&self, id: JobId) -> Result<crate::jobs::JobSnapshot, StoreError> {
            self.inner.fetch_snapshot(id).await
        }
    }

    #[tokio::test]
    async fn storage_failure_fails_the_job_but_keeps_written_rows() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            writes_allowed: AtomicU32::new(1),
        });
        let result = parsed(vec![order(80.0), order(25.0), order(10.0)], vec![]);

        let (job, seed) = job_from_parse(Uuid::new_v4(), "orders.csv", &result);
        let id = job.id;
        store.create_job(job.clone(), seed).await.unwrap();

        let config = OrchestratorConfig {
            parallelism: 1,
            ..OrchestratorConfig::default()
        };
        let err = run_job(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::new(HeuristicScorer),
            job,
            result.valid_rows,
            config,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        let fetched = store.fetch_job(id).await.unwrap();
        assert_eq!(fetched.processing_status, ProcessingStatus::Failed);
        assert_eq!(store.fetch_outcomes(id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_job_enforces_the_wall_clock_budget() {
        /// Store whose row writes never return, simulating a hung backend.
        struct StallingStore {
            inner: MemoryStore,
        }

        #[async_trait]
        impl JobStore for StallingStore {
            async fn create_job(
                &self,
                job: BatchJob,
                seed: Vec<RowOutcome>,
            ) -> Result<(), StoreError> {
                self.inner.create_job(job, seed).await
            }

            async fn fetch_job(&self, id: JobId) -> Result<BatchJob, StoreError> {
                self.inner.fetch_job(id).await
            }

            async fn mark_processing(&self, id: JobId) -> Result<(), StoreError> {
                self.inner.mark_processing(id).await
            }

            async fn record_row_outcome(
                &self,
                _id: JobId,
                _outcome: RowOutcome,
            ) -> Result<bool, StoreError> {
                std::future::pending().await
            }

            async fn fetch_outcomes(&self, id: JobId) -> Result<Vec<RowOutcome>, StoreError> {
                self.inner.fetch_outcomes(id).await
            }

            async fn complete_job(&self, id: JobId) -> Result<(), StoreError> {
                self.inner.complete_job(id).await
            }

            async fn fail_job(&self, id: JobId, reason: &str) -> Result<(), StoreError> {
                self.inner.fail_job(id, reason).await
            }

            async fn fetch_snapshot(
                &self,
                id: JobId,
            ) -> Result<crate::jobs::JobSnapshot, StoreError> {
                self.inner.fetch_snapshot(id).await
            }
        }

        let store = Arc::new(StallingStore {
            inner: MemoryStore::new(),
        });
        let result = parsed(vec![order(80.0)], vec![]);

        let (job, seed) = job_from_parse(Uuid::new_v4(), "orders.csv", &result);
        let id = job.id;
        store.create_job(job.clone(), seed).await.unwrap();

        let config = OrchestratorConfig {
            job_budget: Duration::from_millis(50),
            ..OrchestratorConfig::default()
        };

        spawn_job(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::new(HeuristicScorer),
            job,
            result.valid_rows,
            config,
        )
        .await
        .unwrap();

        let fetched = store.fetch_job(id).await.unwrap();
        assert_eq!(fetched.processing_status, ProcessingStatus::Failed);
        assert!(fetched
            .error_message
            .as_deref()
            .unwrap()
            .contains("budget"));
    }
}
