use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::{BatchJob, JobId, JobSnapshot, ProcessingStatus, RowOutcome};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: ProcessingStatus,
        to: ProcessingStatus,
    },
    #[error("row {row} out of range for job {job}")]
    RowOutOfRange { job: JobId, row: u32 },
}

struct LedgerEntry {
    job: BatchJob,
    // One slot per source row, 1-based rows at index row - 1.
    rows: Vec<Option<RowOutcome>>,
}

/// In-memory record of jobs and their per-row outcomes. Backs the
/// memory store used by tests and mirrors the database semantics:
/// monotonic status transitions and write-once row slots.
#[derive(Default)]
pub struct JobLedger {
    entries: HashMap<JobId, LedgerEntry>,
}

impl JobLedger {
    pub fn insert_job(&mut self, job: BatchJob, seed_outcomes: Vec<RowOutcome>) {
        let mut rows = vec![None; job.row_count as usize];
        for outcome in seed_outcomes {
            let index = outcome.row.saturating_sub(1) as usize;
            if index < rows.len() {
                rows[index] = Some(outcome);
            }
        }
        self.entries.insert(job.id, LedgerEntry { job, rows });
    }

    pub fn job(&self, id: JobId) -> Result<&BatchJob, LedgerError> {
        self.entries
            .get(&id)
            .map(|entry| &entry.job)
            .ok_or(LedgerError::NotFound(id))
    }

    /// Move a job to `next`. Re-asserting the current state is a no-op
    /// so concurrent writers cannot fail each other; any other illegal
    /// edge is rejected.
    pub fn transition(
        &mut self,
        id: JobId,
        next: ProcessingStatus,
        error_message: Option<String>,
    ) -> Result<(), LedgerError> {
        let entry = self.entries.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        let current = entry.job.processing_status;

        if current == next {
            return Ok(());
        }
        if !current.can_transition(next) {
            return Err(LedgerError::InvalidTransition {
                job: id,
                from: current,
                to: next,
            });
        }

        let now = Utc::now();
        entry.job.processing_status = next;
        entry.job.updated_at = now;
        match next {
            ProcessingStatus::Processing => entry.job.processing_started_at = Some(now),
            ProcessingStatus::Completed | ProcessingStatus::Failed => {
                entry.job.finished_at = Some(now);
                if let Some(message) = error_message {
                    entry.job.error_message = Some(message);
                }
            }
            ProcessingStatus::Pending => {}
        }

        Ok(())
    }

    /// Record a row outcome. The first write wins; a repeat write for
    /// the same row is ignored and reported as `false`.
    pub fn record_outcome(
        &mut self,
        id: JobId,
        outcome: RowOutcome,
    ) -> Result<bool, LedgerError> {
        let entry = self.entries.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        let row = outcome.row;
        let index = row.saturating_sub(1) as usize;

        let slot = entry
            .rows
            .get_mut(index)
            .filter(|_| row >= 1)
            .ok_or(LedgerError::RowOutOfRange { job: id, row })?;

        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(outcome);
        entry.job.updated_at = Utc::now();
        Ok(true)
    }

    pub fn rows_terminal(&self, id: JobId) -> Result<u32, LedgerError> {
        let entry = self.entries.get(&id).ok_or(LedgerError::NotFound(id))?;
        Ok(entry.rows.iter().filter(|slot| slot.is_some()).count() as u32)
    }

    pub fn all_rows_terminal(&self, id: JobId) -> Result<bool, LedgerError> {
        let entry = self.entries.get(&id).ok_or(LedgerError::NotFound(id))?;
        Ok(entry.rows.iter().all(|slot| slot.is_some()))
    }

    /// Row outcomes in source-row order, skipping rows that have not
    /// finished yet.
    pub fn outcomes(&self, id: JobId) -> Result<Vec<RowOutcome>, LedgerError> {
        let entry = self.entries.get(&id).ok_or(LedgerError::NotFound(id))?;
        Ok(entry.rows.iter().flatten().cloned().collect())
    }

    pub fn snapshot(&self, id: JobId) -> Result<JobSnapshot, LedgerError> {
        let entry = self.entries.get(&id).ok_or(LedgerError::NotFound(id))?;
        Ok(JobSnapshot {
            id,
            processing_status: entry.job.processing_status,
            upload_status: entry.job.upload_status,
            row_count: entry.job.row_count,
            rows_terminal: entry.rows.iter().filter(|slot| slot.is_some()).count() as u32,
            error_message: entry.job.error_message.clone(),
        })
    }

    /// Force jobs whose processing window expired to FAILED. Returns
    /// the ids that were failed, for logging.
    pub fn fail_overdue(&mut self, now: DateTime<Utc>, budget: Duration) -> Vec<JobId> {
        let mut failed = Vec::new();
        for (id, entry) in &mut self.entries {
            if entry.job.processing_status != ProcessingStatus::Processing {
                continue;
            }
            let started = entry.job.processing_started_at.unwrap_or(entry.job.created_at);
            if now - started < budget {
                continue;
            }
            entry.job.processing_status = ProcessingStatus::Failed;
            entry.job.error_message = Some("processing time budget exceeded".to_string());
            entry.job.finished_at = Some(now);
            entry.job.updated_at = now;
            failed.push(*id);
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{PredictionRecord, RowOutcomeKind};
    use crate::order::{Gender, OrderRecord, PaymentMethod, ProductCategory, ShippingMethod};
    use crate::risk::RiskLevel;
    use uuid::Uuid;

    fn sample_order() -> OrderRecord {
        OrderRecord {
            order_id: Some("A-1".into()),
            category: ProductCategory::Books,
            price: 9.99,
            quantity: 1,
            age: 30,
            gender: Gender::Male,
            location: "Utah".into(),
            payment_method: PaymentMethod::Cash,
            shipping_method: ShippingMethod::Standard,
            discount_percent: 0.0,
        }
    }

    fn scored_outcome(row: u32) -> RowOutcome {
        RowOutcome {
            row,
            kind: RowOutcomeKind::Scored(PredictionRecord::completed(
                sample_order(),
                0.2,
                RiskLevel::Low,
                0.8,
                "test-model".into(),
            )),
        }
    }

    fn job_with_rows(rows: u32) -> BatchJob {
        let mut job = BatchJob::new(Uuid::new_v4(), "orders.csv");
        job.row_count = rows;
        job
    }

    #[test]
    fn transition_follows_the_state_machine() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(1);
        let id = job.id;
        ledger.insert_job(job, vec![]);

        ledger.transition(id, ProcessingStatus::Processing, None).unwrap();
        assert!(ledger.job(id).unwrap().processing_started_at.is_some());

        ledger.transition(id, ProcessingStatus::Completed, None).unwrap();
        assert!(ledger.job(id).unwrap().finished_at.is_some());

        // Terminal states never move again.
        let err = ledger
            .transition(id, ProcessingStatus::Failed, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[test]
    fn reasserting_the_current_state_is_a_no_op() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(1);
        let id = job.id;
        ledger.insert_job(job, vec![]);

        ledger.transition(id, ProcessingStatus::Processing, None).unwrap();
        ledger.transition(id, ProcessingStatus::Processing, None).unwrap();
        assert_eq!(
            ledger.job(id).unwrap().processing_status,
            ProcessingStatus::Processing
        );
    }

    #[test]
    fn pending_cannot_jump_to_completed() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(1);
        let id = job.id;
        ledger.insert_job(job, vec![]);

        let err = ledger
            .transition(id, ProcessingStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[test]
    fn first_row_write_wins() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(2);
        let id = job.id;
        ledger.insert_job(job, vec![]);

        assert!(ledger.record_outcome(id, scored_outcome(1)).unwrap());
        assert!(!ledger.record_outcome(id, scored_outcome(1)).unwrap());
        assert_eq!(ledger.rows_terminal(id).unwrap(), 1);
        assert_eq!(ledger.outcomes(id).unwrap().len(), 1);
    }

    #[test]
    fn out_of_range_rows_are_rejected() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(2);
        let id = job.id;
        ledger.insert_job(job, vec![]);

        let err = ledger.record_outcome(id, scored_outcome(3)).unwrap_err();
        assert_eq!(err, LedgerError::RowOutOfRange { job: id, row: 3 });

        let err = ledger.record_outcome(id, scored_outcome(0)).unwrap_err();
        assert_eq!(err, LedgerError::RowOutOfRange { job: id, row: 0 });
    }

    #[test]
    fn outcomes_come_back_in_row_order() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(3);
        let id = job.id;
        ledger.insert_job(job, vec![]);

        ledger.record_outcome(id, scored_outcome(3)).unwrap();
        ledger.record_outcome(id, scored_outcome(1)).unwrap();
        ledger.record_outcome(id, scored_outcome(2)).unwrap();

        let rows: Vec<u32> = ledger
            .outcomes(id)
            .unwrap()
            .into_iter()
            .map(|outcome| outcome.row)
            .collect();
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn seeded_parse_errors_count_as_terminal_rows() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(2);
        let id = job.id;
        ledger.insert_job(
            job,
            vec![RowOutcome {
                row: 2,
                kind: RowOutcomeKind::Invalid {
                    message: "invalid category".into(),
                },
            }],
        );

        assert_eq!(ledger.rows_terminal(id).unwrap(), 1);
        assert!(!ledger.all_rows_terminal(id).unwrap());

        ledger.record_outcome(id, scored_outcome(1)).unwrap();
        assert!(ledger.all_rows_terminal(id).unwrap());
    }

    #[test]
    fn fail_overdue_only_touches_stale_processing_jobs() {
        let mut ledger = JobLedger::default();

        let stale = job_with_rows(1);
        let stale_id = stale.id;
        ledger.insert_job(stale, vec![]);
        ledger
            .transition(stale_id, ProcessingStatus::Processing, None)
            .unwrap();

        let fresh = job_with_rows(1);
        let fresh_id = fresh.id;
        ledger.insert_job(fresh, vec![]);

        let later = Utc::now() + Duration::minutes(15);
        let failed = ledger.fail_overdue(later, Duration::minutes(10));

        assert_eq!(failed, vec![stale_id]);
        assert_eq!(
            ledger.job(stale_id).unwrap().processing_status,
            ProcessingStatus::Failed
        );
        assert!(ledger
            .job(stale_id)
            .unwrap()
            .error_message
            .as_deref()
            .unwrap()
            .contains("budget"));
        assert_eq!(
            ledger.job(fresh_id).unwrap().processing_status,
            ProcessingStatus::Pending
        );
    }

    #[test]
    fn fail_overdue_leaves_jobs_inside_the_budget_alone() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(1);
        let id = job.id;
        ledger.insert_job(job, vec![]);
        ledger.transition(id, ProcessingStatus::Processing, None).unwrap();

        let soon = Utc::now() + Duration::minutes(5);
        assert!(ledger.fail_overdue(soon, Duration::minutes(10)).is_empty());
        assert_eq!(
            ledger.job(id).unwrap().processing_status,
            ProcessingStatus::Processing
        );
    }

    #[test]
    fn snapshot_reports_progress() {
        let mut ledger = JobLedger::default();
        let job = job_with_rows(3);
        let id = job.id;
        ledger.insert_job(job, vec![]);
        ledger.record_outcome(id, scored_outcome(1)).unwrap();

        let snapshot = ledger.snapshot(id).unwrap();
        assert_eq!(snapshot.row_count, 3);
        assert_eq!(snapshot.rows_terminal, 1);
        assert_eq!(snapshot.processing_status, ProcessingStatus::Pending);
    }
}
