use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::ParseResult;
use crate::order::OrderRecord;
use crate::risk::RiskLevel;

pub mod ledger;
pub mod orchestrator;
pub mod store;

pub type JobId = Uuid;
pub type PrincipalId = Uuid;

/// Outcome of validating the uploaded file itself, independent of
/// scoring progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadStatus {
    Received,
    Validating,
    Valid,
    Invalid,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Received => "RECEIVED",
            UploadStatus::Validating => "VALIDATING",
            UploadStatus::Valid => "VALID",
            UploadStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RECEIVED" => Some(UploadStatus::Received),
            "VALIDATING" => Some(UploadStatus::Validating),
            "VALID" => Some(UploadStatus::Valid),
            "INVALID" => Some(UploadStatus::Invalid),
            _ => None,
        }
    }
}

/// Lifecycle of a batch job. Transitions are monotonic: once a job is
/// terminal it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ProcessingStatus::Pending),
            "PROCESSING" => Some(ProcessingStatus::Processing),
            "COMPLETED" => Some(ProcessingStatus::Completed),
            "FAILED" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    /// Legal forward edges of the state machine.
    pub fn can_transition(&self, next: ProcessingStatus) -> bool {
        matches!(
            (self, next),
            (
                ProcessingStatus::Pending,
                ProcessingStatus::Processing | ProcessingStatus::Failed
            ) | (
                ProcessingStatus::Processing,
                ProcessingStatus::Completed | ProcessingStatus::Failed
            )
        )
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a single row within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PredictionStatus {
    Completed,
    Failed,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Completed => "COMPLETED",
            PredictionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "COMPLETED" => Some(PredictionStatus::Completed),
            "FAILED" => Some(PredictionStatus::Failed),
            _ => None,
        }
    }
}

/// Scoring result for one order row. A completed record always carries
/// a probability and risk level; a failed one carries an error instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub order: OrderRecord,
    pub status: PredictionStatus,
    pub return_probability: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub confidence: Option<f64>,
    pub model_version: Option<String>,
    pub error_message: Option<String>,
}

impl PredictionRecord {
    pub fn completed(
        order: OrderRecord,
        return_probability: f64,
        risk_level: RiskLevel,
        confidence: f64,
        model_version: String,
    ) -> Self {
        Self {
            order,
            status: PredictionStatus::Completed,
            return_probability: Some(return_probability),
            risk_level: Some(risk_level),
            confidence: Some(confidence),
            model_version: Some(model_version),
            error_message: None,
        }
    }

    pub fn failed(order: OrderRecord, error_message: String) -> Self {
        Self {
            order,
            status: PredictionStatus::Failed,
            return_probability: None,
            risk_level: None,
            confidence: None,
            model_version: None,
            error_message: Some(error_message),
        }
    }
}

/// What happened to one source row: it either reached the scoring
/// engine or was rejected at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub row: u32,
    #[serde(flatten)]
    pub kind: RowOutcomeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowOutcomeKind {
    Scored(PredictionRecord),
    Invalid { message: String },
}

/// One uploaded batch and its lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: JobId,
    pub principal: PrincipalId,
    pub filename: String,
    pub upload_status: UploadStatus,
    pub processing_status: ProcessingStatus,
    pub row_count: u32,
    pub invalid_row_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(principal: PrincipalId, filename: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            principal,
            filename: filename.to_string(),
            upload_status: UploadStatus::Received,
            processing_status: ProcessingStatus::Pending,
            row_count: 0,
            invalid_row_count: 0,
            error_message: None,
            created_at: now,
            processing_started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }
}

/// Point-in-time view of a job used by status polling and the
/// completion check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub processing_status: ProcessingStatus,
    pub upload_status: UploadStatus,
    pub row_count: u32,
    pub rows_terminal: u32,
    pub error_message: Option<String>,
}

/// Seed a job and its per-row slots from a parsed upload. Parse errors
/// become terminal row outcomes immediately; valid rows stay open for
/// the orchestrator.
pub fn job_from_parse(
    principal: PrincipalId,
    filename: &str,
    parsed: &ParseResult,
) -> (BatchJob, Vec<RowOutcome>) {
    let mut job = BatchJob::new(principal, filename);
    job.row_count = parsed.total_rows;
    job.invalid_row_count = parsed.row_errors.len() as u32;
    job.upload_status = if parsed.valid_rows.is_empty() {
        UploadStatus::Invalid
    } else {
        UploadStatus::Valid
    };

    let invalid = parsed
        .row_errors
        .iter()
        .map(|error| RowOutcome {
            row: error.line,
            kind: RowOutcomeKind::Invalid {
                message: error.message.clone(),
            },
        })
        .collect();

    (job, invalid)
}
