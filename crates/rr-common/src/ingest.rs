use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{
    Gender, OrderRecord, PaymentMethod, ProductCategory, ShippingMethod, MAX_AGE, MIN_AGE,
};

/// Hard cap on data rows per upload. Exceeding it rejects the whole
/// file before any row is scored.
pub const MAX_BATCH_ROWS: usize = 10_000;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported upload format: {0}")]
    FormatUnsupported(String),
    #[error("upload exceeds the {MAX_BATCH_ROWS} row limit")]
    RowLimitExceeded,
    #[error("failed to read upload: {0}")]
    Malformed(String),
}

/// Validation failure for one source row, tagged with its 1-based data
/// row number (header excluded for CSV).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ParseResult {
    pub valid_rows: Vec<(u32, OrderRecord)>,
    pub row_errors: Vec<RowError>,
    pub total_rows: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadFormat {
    Csv,
    Json,
}

/// Raw, unvalidated order fields as they appear in an upload row or a
/// single-prediction request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderDraft {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(alias = "product_category")]
    pub category: String,
    pub price: f64,
    pub quantity: i64,
    pub age: i64,
    pub gender: String,
    pub location: String,
    pub payment_method: String,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default, alias = "discount_applied")]
    pub discount_percent: Option<f64>,
}

impl OrderDraft {
    /// Validate field domains and produce an immutable order record.
    /// All problems for the row are reported together.
    pub fn validate(self) -> Result<OrderRecord, String> {
        let mut problems = Vec::new();

        if self.price <= 0.0 {
            problems.push("price must be greater than zero".to_string());
        }
        let quantity = u32::try_from(self.quantity).ok();
        if self.quantity < 1 {
            problems.push("quantity must be at least 1".to_string());
        } else if quantity.is_none() {
            problems.push(format!("quantity must be at most {}", u32::MAX));
        }

        let category = ProductCategory::parse(self.category.trim());
        if category.is_none() {
            problems.push(format!("invalid category: {}", self.category.trim()));
        }

        let gender = Gender::parse(self.gender.trim());
        if gender.is_none() {
            problems.push(format!("invalid gender: {}", self.gender.trim()));
        }

        let payment_method = PaymentMethod::parse(self.payment_method.trim());
        if payment_method.is_none() {
            problems.push(format!(
                "invalid payment method: {}",
                self.payment_method.trim()
            ));
        }

        let shipping_method = match self.shipping_method.as_deref().map(str::trim) {
            None | Some("") => Some(ShippingMethod::Standard),
            Some(raw) => {
                let parsed = ShippingMethod::parse(raw);
                if parsed.is_none() {
                    problems.push(format!("invalid shipping method: {raw}"));
                }
                parsed
            }
        };

        if self.age < i64::from(MIN_AGE) || self.age > i64::from(MAX_AGE) {
            problems.push(format!("age must be between {MIN_AGE} and {MAX_AGE}"));
        }

        let discount = self.discount_percent.unwrap_or(0.0);
        if !(0.0..=100.0).contains(&discount) {
            problems.push("discount must be between 0 and 100".to_string());
        }

        let location = self.location.trim().to_string();
        if location.is_empty() {
            problems.push("location is required".to_string());
        }

        let (
            Some(category),
            Some(gender),
            Some(payment_method),
            Some(shipping_method),
            Some(quantity),
        ) = (category, gender, payment_method, shipping_method, quantity)
        else {
            return Err(problems.join("; "));
        };

        if !problems.is_empty() {
            return Err(problems.join("; "));
        }

        Ok(OrderRecord {
            order_id: self
                .order_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            category,
            price: self.price,
            quantity,
            age: self.age as u32,
            gender,
            location,
            payment_method,
            shipping_method,
            discount_percent: discount,
        })
    }
}

fn detect_format(declared_mime: &str, filename: &str) -> Result<UploadFormat, ParseError> {
    let base_mime = declared_mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match base_mime.as_str() {
        "text/csv" | "application/csv" => return Ok(UploadFormat::Csv),
        "application/json" => return Ok(UploadFormat::Json),
        // Browsers often fall back to a generic type; trust the extension.
        "" | "application/octet-stream" => {}
        other => return Err(ParseError::FormatUnsupported(other.to_string())),
    }

    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => Ok(UploadFormat::Csv),
        "json" => Ok(UploadFormat::Json),
        _ => Err(ParseError::FormatUnsupported(format!(
            "{base_mime} ({filename})"
        ))),
    }
}

/// Parse an uploaded batch file into validated order rows and per-row
/// errors. Row-level failures never abort the rest of the file; only
/// format and row-limit violations reject the upload as a whole.
pub fn parse(
    file_bytes: &[u8],
    declared_mime: &str,
    filename: &str,
) -> Result<ParseResult, ParseError> {
    match detect_format(declared_mime, filename)? {
        UploadFormat::Csv => parse_csv(file_bytes),
        UploadFormat::Json => parse_json(file_bytes),
    }
}

fn push_row(result: &mut ParseResult, line: u32, draft: Result<OrderDraft, String>) {
    match draft.and_then(OrderDraft::validate) {
        Ok(order) => result.valid_rows.push((line, order)),
        Err(message) => result.row_errors.push(RowError { line, message }),
    }
}

fn parse_csv(file_bytes: &[u8]) -> Result<ParseResult, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(file_bytes);

    let mut result = ParseResult::default();

    for (index, record) in reader.deserialize::<OrderDraft>().enumerate() {
        if index >= MAX_BATCH_ROWS {
            return Err(ParseError::RowLimitExceeded);
        }

        let line = index as u32 + 1;
        result.total_rows = line;
        push_row(&mut result, line, record.map_err(|err| err.to_string()));
    }

    Ok(result)
}

fn parse_json(file_bytes: &[u8]) -> Result<ParseResult, ParseError> {
    let rows: Vec<serde_json::Value> = serde_json::from_slice(file_bytes)
        .map_err(|err| ParseError::Malformed(format!("expected a JSON array of orders: {err}")))?;

    if rows.len() > MAX_BATCH_ROWS {
        return Err(ParseError::RowLimitExceeded);
    }

    let mut result = ParseResult::default();
    result.total_rows = rows.len() as u32;

    for (index, value) in rows.into_iter().enumerate() {
        let line = index as u32 + 1;
        let draft =
            serde_json::from_value::<OrderDraft>(value).map_err(|err| err.to_string());
        push_row(&mut result, line, draft);
    }

    Ok(result)
}
