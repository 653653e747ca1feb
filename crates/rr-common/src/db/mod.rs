pub mod batch_jobs;
pub mod migrations;
pub mod pool;
pub mod predictions;
pub mod store;

// Keep re-exports unique so downstream crates see a single symbol per helper.
pub use batch_jobs::{
    complete_job, fail_job, fail_timed_out_jobs, fetch_job, fetch_outcomes, fetch_snapshot,
    insert_job, mark_processing, record_prediction_row, JobStorageError,
};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool_from_url, create_pool_from_url_checked, DbPoolError, PgPool};
pub use predictions::{
    insert_prediction, recent_predictions, PredictionStorageError, StoredPrediction,
};
pub use store::PgStore;
