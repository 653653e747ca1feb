use serde::Serialize;
use thiserror::Error;

use crate::jobs::{BatchJob, PredictionStatus, ProcessingStatus, RowOutcome, RowOutcomeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("job is {0}, results are only exportable once COMPLETED")]
    JobNotReady(ProcessingStatus),
    #[error("job failed: {0}")]
    JobFailed(String),
    #[error("could not serialize results: {0}")]
    Serialize(String),
}

/// One line of an export, flattened for both CSV and JSON output.
#[derive(Debug, Serialize)]
struct ExportRow {
    row: u32,
    order_id: Option<String>,
    status: &'static str,
    return_probability: Option<String>,
    risk_level: Option<&'static str>,
    confidence: Option<String>,
    model_version: Option<String>,
    error: Option<String>,
}

// Fixed precision keeps repeated exports byte-identical.
fn format_probability(value: f64) -> String {
    format!("{value:.6}")
}

fn export_row(outcome: &RowOutcome) -> ExportRow {
    match &outcome.kind {
        RowOutcomeKind::Scored(record) => ExportRow {
            row: outcome.row,
            order_id: record.order.order_id.clone(),
            status: match record.status {
                PredictionStatus::Completed => "COMPLETED",
                PredictionStatus::Failed => "FAILED",
            },
            return_probability: record.return_probability.map(format_probability),
            risk_level: record.risk_level.map(|level| level.as_str()),
            confidence: record.confidence.map(format_probability),
            model_version: record.model_version.clone(),
            error: record.error_message.clone(),
        },
        RowOutcomeKind::Invalid { message } => ExportRow {
            row: outcome.row,
            order_id: None,
            status: "INVALID",
            return_probability: None,
            risk_level: None,
            confidence: None,
            model_version: None,
            error: Some(message.clone()),
        },
    }
}

/// Render a completed job's results. Output is deterministic: rows in
/// source order and floats at fixed precision, so re-downloading the
/// same job yields identical bytes.
pub fn export_results(
    job: &BatchJob,
    outcomes: &[RowOutcome],
    format: ExportFormat,
) -> Result<Vec<u8>, ExportError> {
    match job.processing_status {
        ProcessingStatus::Completed => {}
        ProcessingStatus::Failed => {
            return Err(ExportError::JobFailed(
                job.error_message
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string()),
            ))
        }
        other => return Err(ExportError::JobNotReady(other)),
    }

    let mut rows: Vec<ExportRow> = outcomes.iter().map(export_row).collect();
    rows.sort_by_key(|row| row.row);

    match format {
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for row in &rows {
                writer
                    .serialize(row)
                    .map_err(|err| ExportError::Serialize(err.to_string()))?;
            }
            writer
                .into_inner()
                .map_err(|err| ExportError::Serialize(err.to_string()))
        }
        ExportFormat::Json => serde_json::to_vec_pretty(&rows)
            .map_err(|err| ExportError::Serialize(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BatchJob, PredictionRecord};
    use crate::order::{Gender, OrderRecord, PaymentMethod, ProductCategory, ShippingMethod};
    use crate::risk::RiskLevel;
    use uuid::Uuid;

    fn order(order_id: &str) -> OrderRecord {
        OrderRecord {
            order_id: Some(order_id.into()),
            category: ProductCategory::Clothing,
            price: 80.0,
            quantity: 1,
            age: 30,
            gender: Gender::Female,
            location: "California".into(),
            payment_method: PaymentMethod::CreditCard,
            shipping_method: ShippingMethod::Standard,
            discount_percent: 0.0,
        }
    }

    fn completed_job() -> BatchJob {
        let mut job = BatchJob::new(Uuid::new_v4(), "orders.csv");
        job.row_count = 3;
        job.processing_status = ProcessingStatus::Completed;
        job
    }

    fn outcomes() -> Vec<RowOutcome> {
        vec![
            RowOutcome {
                row: 2,
                kind: RowOutcomeKind::Invalid {
                    message: "invalid category: Furniture".into(),
                },
            },
            RowOutcome {
                row: 1,
                kind: RowOutcomeKind::Scored(PredictionRecord::completed(
                    order("A-1"),
                    0.512345678,
                    RiskLevel::Medium,
                    0.512345678,
                    "heuristic-2024.1".into(),
                )),
            },
            RowOutcome {
                row: 3,
                kind: RowOutcomeKind::Scored(PredictionRecord::failed(
                    order("A-3"),
                    "model offline".into(),
                )),
            },
        ]
    }

    #[test]
    fn csv_export_is_ordered_and_deterministic() {
        let job = completed_job();
        let rows = outcomes();

        let first = export_results(&job, &rows, ExportFormat::Csv).unwrap();
        let second = export_results(&job, &rows, ExportFormat::Csv).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("row,order_id,status"));
        assert!(lines[1].starts_with("1,A-1,COMPLETED,0.512346,MEDIUM"));
        assert!(lines[2].starts_with("2,,INVALID"));
        assert!(lines[3].starts_with("3,A-3,FAILED"));
    }

    #[test]
    fn json_export_carries_every_row() {
        let job = completed_job();
        let bytes = export_results(&job, &outcomes(), ExportFormat::Json).unwrap();

        let rows: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["status"], "COMPLETED");
        assert_eq!(rows[0]["return_probability"], "0.512346");
        assert_eq!(rows[1]["status"], "INVALID");
        assert_eq!(rows[1]["error"], "invalid category: Furniture");
        assert_eq!(rows[2]["status"], "FAILED");
        assert_eq!(rows[2]["error"], "model offline");
    }

    #[test]
    fn unfinished_jobs_cannot_be_exported() {
        let mut job = completed_job();
        job.processing_status = ProcessingStatus::Processing;

        let err = export_results(&job, &outcomes(), ExportFormat::Csv).unwrap_err();
        assert!(matches!(
            err,
            ExportError::JobNotReady(ProcessingStatus::Processing)
        ));
    }

    #[test]
    fn failed_jobs_surface_their_error() {
        let mut job = completed_job();
        job.processing_status = ProcessingStatus::Failed;
        job.error_message = Some("processing time budget exceeded".into());

        let err = export_results(&job, &outcomes(), ExportFormat::Csv).unwrap_err();
        assert!(matches!(err, ExportError::JobFailed(message) if message.contains("budget")));
    }

    #[test]
    fn format_parsing_is_strict() {
        assert_eq!(ExportFormat::parse("csv"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("json"), Some(ExportFormat::Json));
        assert!(ExportFormat::parse("xlsx").is_none());
        assert!(ExportFormat::parse("CSV").is_none());
    }
}
