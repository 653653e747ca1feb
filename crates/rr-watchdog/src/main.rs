use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use dotenvy::dotenv;
use rr_common::db::{create_pool_from_url_checked, fail_timed_out_jobs, PgPool};
use rr_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "rr-watchdog", about = "Fails batch jobs stuck past their time budget")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Wall-clock budget in seconds before a PROCESSING job is failed
    #[arg(long, env = "RR_JOB_BUDGET_SECS", default_value_t = 600)]
    job_budget_secs: i64,

    /// Delay between sweeps
    #[arg(long, env = "RR_WATCHDOG_SWEEP_INTERVAL_MS", default_value_t = 30_000)]
    sweep_interval_ms: u64,

    /// Run a single sweep and exit (for cron-style deployment)
    #[arg(long, default_value_t = false)]
    run_once: bool,
}

async fn sweep(pool: &PgPool, budget: chrono::Duration) {
    match fail_timed_out_jobs(pool, Utc::now(), budget).await {
        Ok(0) => {}
        Ok(failed) => info!(failed, "failed over-budget jobs"),
        Err(err) => error!(error = %err, "sweep failed"),
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let cli = Cli::parse();
    let budget = chrono::Duration::seconds(cli.job_budget_secs.max(1));

    let pool = match create_pool_from_url_checked(&cli.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "could not connect to the database");
            std::process::exit(1);
        }
    };

    info!(
        budget_secs = cli.job_budget_secs,
        sweep_interval_ms = cli.sweep_interval_ms,
        run_once = cli.run_once,
        "rr-watchdog started"
    );

    if cli.run_once {
        sweep(&pool, budget).await;
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.sweep_interval_ms.max(100)));
    loop {
        ticker.tick().await;
        sweep(&pool, budget).await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rr_common::jobs::ledger::JobLedger;
    use rr_common::jobs::{BatchJob, ProcessingStatus};
    use uuid::Uuid;

    fn processing_job(ledger: &mut JobLedger) -> Uuid {
        let mut job = BatchJob::new(Uuid::new_v4(), "orders.csv");
        job.row_count = 1;
        let id = job.id;
        ledger.insert_job(job, vec![]);
        ledger
            .transition(id, ProcessingStatus::Processing, None)
            .unwrap();
        id
    }

    #[test]
    fn over_budget_processing_jobs_are_failed() {
        let mut ledger = JobLedger::default();
        let id = processing_job(&mut ledger);

        let later = Utc::now() + Duration::minutes(11);
        let failed = ledger.fail_overdue(later, Duration::minutes(10));

        assert_eq!(failed, vec![id]);
        let job = ledger.job(id).unwrap();
        assert_eq!(job.processing_status, ProcessingStatus::Failed);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn completed_jobs_are_never_touched() {
        let mut ledger = JobLedger::default();
        let id = processing_job(&mut ledger);
        ledger
            .transition(id, ProcessingStatus::Completed, None)
            .unwrap();

        let later = Utc::now() + Duration::hours(1);
        assert!(ledger.fail_overdue(later, Duration::minutes(10)).is_empty());
        assert_eq!(
            ledger.job(id).unwrap().processing_status,
            ProcessingStatus::Completed
        );
    }

    #[test]
    fn a_failed_job_stays_failed_across_sweeps() {
        let mut ledger = JobLedger::default();
        let id = processing_job(&mut ledger);

        let later = Utc::now() + Duration::minutes(20);
        let budget = Duration::minutes(10);

        assert_eq!(ledger.fail_overdue(later, budget), vec![id]);
        assert!(ledger.fail_overdue(later + budget, budget).is_empty());
    }
}
