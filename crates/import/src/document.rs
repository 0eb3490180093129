use kesef_core::TransactionKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;

use crate::normalize::parse_amount;
use crate::row::{ExtractedDetails, ParseOutcome, RawRow, RowSkipReason};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("Extraction request failed: {0}")]
    Request(String),
    #[error("Extraction service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Extraction response contained no tool call")]
    NoToolCall,
    #[error("Failed to decode extraction result: {0}")]
    Decode(String),
    #[error("No extraction capability is configured for document statements")]
    NotConfigured,
}

impl From<serde_json::Error> for ExtractionError {
    fn from(e: serde_json::Error) -> Self {
        ExtractionError::Decode(e.to_string())
    }
}

pub const EXTRACTION_INSTRUCTION: &str = "\
Read this bank or credit card statement and list every transaction it contains. \
The statement may be in Hebrew and may mix currencies (ILS, USD, EUR). For each \
transaction give the transaction date and, when shown, the payment date, both as \
YYYY-MM-DD; the merchant name as a clean, standardized English name; the amount and \
currency exactly as charged; the final amount in the account's base currency; the \
exchange rate when one was applied; any fee; and whether it is a regular charge or a \
refund. Pick a category from: Transportation, Accommodation, Shopping, Food & Dining, \
Groceries, Services, Entertainment, Travel, Co-working, Health & Wellness, Technology, \
Salary, Transfer, Bank Fees, Other. Mark money received as direction income and money \
spent as direction expense.";

/// JSON schema the capability must answer with.
pub fn transaction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "transactions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "transaction_date": { "type": "string", "description": "Transaction date YYYY-MM-DD" },
                        "payment_date": { "type": "string", "description": "Payment date YYYY-MM-DD" },
                        "merchant": { "type": "string", "description": "Merchant name" },
                        "category": { "type": "string", "description": "Transaction category" },
                        "original_amount": { "type": "number", "description": "Amount in original currency" },
                        "original_currency": { "type": "string", "description": "Currency code (USD, EUR, ILS)" },
                        "exchange_rate": { "type": ["number", "null"], "description": "Exchange rate if applicable" },
                        "amount_base": { "type": "number", "description": "Final amount in the base currency" },
                        "fee": { "type": "number", "description": "Transaction fee" },
                        "type": { "type": "string", "enum": ["regular", "refund"] },
                        "direction": { "type": "string", "enum": ["income", "expense"] },
                        "description": { "type": "string", "description": "Statement line as printed" }
                    },
                    "required": [
                        "transaction_date", "merchant", "category", "original_amount",
                        "original_currency", "amount_base", "type"
                    ]
                }
            }
        },
        "required": ["transactions"]
    })
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub document: Vec<u8>,
    pub mime_type: String,
    pub instruction: String,
    pub schema: Value,
}

impl ExtractionRequest {
    pub fn new(document: Vec<u8>, mime_type: &str) -> Self {
        Self {
            document,
            mime_type: mime_type.to_string(),
            instruction: EXTRACTION_INSTRUCTION.to_string(),
            schema: transaction_schema(),
        }
    }
}

/// Numbers sometimes come back as strings ("1,200.50"); accept both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Number(serde_json::Number),
    Text(String),
}

impl LooseNumber {
    /// Plain decimal text; JSON floats such as `1e21` are expanded.
    fn as_text(&self) -> String {
        match self {
            LooseNumber::Number(n) => {
                let text = n.to_string();
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map(|d| d.normalize().to_string())
                    .unwrap_or(text)
            }
            LooseNumber::Text(s) => s.trim().to_string(),
        }
    }
}

/// One transaction as returned by the capability; nothing is trusted until
/// [`ExtractedRow::validate`] has run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedRow {
    pub transaction_date: Option<String>,
    pub payment_date: Option<String>,
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub original_amount: Option<LooseNumber>,
    pub original_currency: Option<String>,
    pub exchange_rate: Option<LooseNumber>,
    #[serde(alias = "amount_ils")]
    pub amount_base: Option<LooseNumber>,
    pub fee: Option<LooseNumber>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub direction: Option<String>,
    pub description: Option<String>,
}

/// Rows stay untyped until [`parse_document`] decodes them one at a time, so a
/// single malformed row cannot sink the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResponse {
    #[serde(default)]
    pub transactions: Vec<Value>,
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, ExtractionError> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ExtractionError::MissingField(field))
}

fn optional_decimal(
    value: Option<&LooseNumber>,
    field: &'static str,
) -> Result<Option<Decimal>, ExtractionError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let text = value.as_text();
    if text.is_empty() {
        return Ok(None);
    }
    parse_amount(&text)
        .map(Some)
        .map_err(|_| ExtractionError::InvalidField { field, value: text })
}

impl ExtractedRow {
    /// Check required fields and turn the row into a raw tuple.
    pub fn validate(self, line: usize) -> Result<RawRow, ExtractionError> {
        let date = required_text(self.transaction_date, "transaction_date")?;
        let merchant = required_text(self.merchant, "merchant")?;
        let category = required_text(self.category, "category")?;
        let amount = self
            .original_amount
            .as_ref()
            .map(LooseNumber::as_text)
            .filter(|s| !s.is_empty())
            .ok_or(ExtractionError::MissingField("original_amount"))?;
        let currency = required_text(self.original_currency, "original_currency")?;
        let amount_base = optional_decimal(self.amount_base.as_ref(), "amount_base")?
            .ok_or(ExtractionError::MissingField("amount_base"))?;
        let kind_text = required_text(self.kind, "type")?;
        let kind = TransactionKind::from_str(&kind_text).map_err(|_| {
            ExtractionError::InvalidField {
                field: "type",
                value: kind_text.clone(),
            }
        })?;

        Ok(RawRow {
            line,
            date,
            description: self
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| merchant.clone()),
            amount,
            currency: Some(currency),
            direction: self.direction.filter(|d| !d.trim().is_empty()),
            details: Some(ExtractedDetails {
                payment_date: self.payment_date.filter(|d| !d.trim().is_empty()),
                category: Some(category),
                amount_base: Some(amount_base),
                exchange_rate: optional_decimal(self.exchange_rate.as_ref(), "exchange_rate")?,
                fee: optional_decimal(self.fee.as_ref(), "fee")?,
                kind,
            }),
        })
    }
}

/// Abstraction over a structured-extraction service for unstructured documents.
pub trait ExtractionBackend: Send + Sync {
    fn extract(
        &self,
        request: ExtractionRequest,
    ) -> impl Future<Output = Result<ExtractionResponse, ExtractionError>> + Send;
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set response regardless of the document.
#[derive(Debug, Clone)]
pub struct MockExtractor {
    pub response: Result<ExtractionResponse, ExtractionError>,
}

impl MockExtractor {
    pub fn new(response: ExtractionResponse) -> Self {
        Self { response: Ok(response) }
    }

    pub fn failing(error: ExtractionError) -> Self {
        Self { response: Err(error) }
    }

    pub fn from_json(json: &str) -> Result<Self, ExtractionError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

impl ExtractionBackend for MockExtractor {
    async fn extract(
        &self,
        _request: ExtractionRequest,
    ) -> Result<ExtractionResponse, ExtractionError> {
        self.response.clone()
    }
}

/// Run the document path: extract, then validate every row. Rows missing a
/// required field are dropped and recorded; a failed call is fatal.
pub async fn parse_document<B: ExtractionBackend>(
    backend: &B,
    data: &[u8],
    mime_type: &str,
) -> Result<ParseOutcome, ExtractionError> {
    let response = backend
        .extract(ExtractionRequest::new(data.to_vec(), mime_type))
        .await?;

    let mut outcome = ParseOutcome::default();
    for (idx, value) in response.transactions.into_iter().enumerate() {
        let line = idx + 1;
        let validated = serde_json::from_value::<ExtractedRow>(value)
            .map_err(ExtractionError::from)
            .and_then(|row| row.validate(line));
        match validated {
            Ok(raw) => outcome.rows.push(raw),
            Err(e) => outcome.skip(line, RowSkipReason::Extraction(e)),
        }
    }

    tracing::info!(
        rows = outcome.rows.len(),
        skipped = outcome.skipped.len(),
        "parsed document statement"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "transactions": [
            {
                "transaction_date": "2024-03-05",
                "payment_date": "2024-04-02",
                "merchant": "Booking.com",
                "category": "Accommodation",
                "original_amount": 120.5,
                "original_currency": "EUR",
                "exchange_rate": 3.98,
                "amount_ils": 479.59,
                "fee": 0,
                "type": "regular"
            },
            {
                "transaction_date": "2024-03-07",
                "merchant": "Amazon",
                "category": "Shopping",
                "original_amount": "-35.00",
                "original_currency": "USD",
                "amount_base": "128.10",
                "type": "refund"
            },
            {
                "transaction_date": "2024-03-09",
                "merchant": "Mystery",
                "original_amount": 10,
                "original_currency": "ILS",
                "amount_base": 10,
                "type": "regular"
            }
        ]
    }"#;

    fn response_row(idx: usize) -> ExtractedRow {
        let response: ExtractionResponse = serde_json::from_str(RESPONSE).unwrap();
        serde_json::from_value(response.transactions[idx].clone()).unwrap()
    }

    #[test]
    fn validate_accepts_complete_row() {
        let row = response_row(0).validate(1).unwrap();
        assert_eq!(row.date, "2024-03-05");
        assert_eq!(row.amount, "120.5");
        assert_eq!(row.currency.as_deref(), Some("EUR"));
        assert_eq!(row.description, "Booking.com");
        let details = row.details.unwrap();
        assert_eq!(details.kind, TransactionKind::Regular);
        assert_eq!(details.amount_base, Some(Decimal::from_str("479.59").unwrap()));
        assert_eq!(details.exchange_rate, Some(Decimal::from_str("3.98").unwrap()));
        assert_eq!(details.payment_date.as_deref(), Some("2024-04-02"));
    }

    #[test]
    fn validate_rejects_missing_category() {
        assert_eq!(
            response_row(2).validate(3),
            Err(ExtractionError::MissingField("category"))
        );
    }

    #[test]
    fn validate_rejects_unknown_type() {
        let row = ExtractedRow {
            transaction_date: Some("2024-01-01".into()),
            merchant: Some("X".into()),
            category: Some("Other".into()),
            original_amount: Some(LooseNumber::Text("5".into())),
            original_currency: Some("ILS".into()),
            amount_base: Some(LooseNumber::Text("5".into())),
            kind: Some("chargeback".into()),
            ..Default::default()
        };
        assert!(matches!(
            row.validate(1),
            Err(ExtractionError::InvalidField { field: "type", .. })
        ));
    }

    #[test]
    fn blank_strings_count_as_missing() {
        let row = ExtractedRow {
            transaction_date: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(
            row.validate(1),
            Err(ExtractionError::MissingField("transaction_date"))
        );
    }

    #[tokio::test]
    async fn parse_document_drops_invalid_rows() {
        let backend = MockExtractor::from_json(RESPONSE).unwrap();
        let out = parse_document(&backend, b"%PDF-1.4", "application/pdf")
            .await
            .unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].line, 3);
        assert_eq!(
            out.skipped[0].reason,
            RowSkipReason::Extraction(ExtractionError::MissingField("category"))
        );
        let refund = out.rows[1].details.as_ref().unwrap();
        assert_eq!(refund.kind, TransactionKind::Refund);
    }

    #[tokio::test]
    async fn mistyped_row_is_dropped_alone() {
        let backend = MockExtractor::from_json(
            r#"{"transactions": [
                {"transaction_date": "2024-03-05", "merchant": "Cafe", "category": "Food & Dining",
                 "original_amount": 18, "original_currency": "ILS", "amount_base": 18, "type": "regular"},
                {"transaction_date": "2024-03-06", "merchant": 42, "category": "Other",
                 "original_amount": 5, "original_currency": "ILS", "amount_base": 5, "type": "regular"},
                {"transaction_date": "2024-03-07", "merchant": "Bakery", "category": "Groceries",
                 "original_amount": "12,40", "original_currency": "EUR", "amount_base": 49.6, "type": "regular"}
            ]}"#,
        )
        .unwrap();
        let out = parse_document(&backend, b"%PDF-1.4", "application/pdf")
            .await
            .unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[1].description, "Bakery");
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].line, 2);
        assert!(matches!(
            out.skipped[0].reason,
            RowSkipReason::Extraction(ExtractionError::Decode(_))
        ));
    }

    #[test]
    fn float_amounts_are_written_without_exponent() {
        let number: LooseNumber = serde_json::from_str("1e21").unwrap();
        assert_eq!(number.as_text(), "1000000000000000000000");
        let number: LooseNumber = serde_json::from_str("120.5").unwrap();
        assert_eq!(number.as_text(), "120.5");
        let number: LooseNumber = serde_json::from_str("0").unwrap();
        assert_eq!(number.as_text(), "0");
    }

    #[test]
    fn string_amounts_accept_decimal_comma() {
        let row = ExtractedRow {
            transaction_date: Some("2024-01-01".into()),
            merchant: Some("X".into()),
            category: Some("Other".into()),
            original_amount: Some(LooseNumber::Text("5".into())),
            original_currency: Some("EUR".into()),
            amount_base: Some(LooseNumber::Text("1.234,56".into())),
            kind: Some("regular".into()),
            ..Default::default()
        };
        let details = row.validate(1).unwrap().details.unwrap();
        assert_eq!(details.amount_base, Some(Decimal::from_str("1234.56").unwrap()));
    }

    #[tokio::test]
    async fn parse_document_propagates_call_failure() {
        let backend = MockExtractor::failing(ExtractionError::NoToolCall);
        assert_eq!(
            parse_document(&backend, b"", "application/pdf").await,
            Err(ExtractionError::NoToolCall)
        );
    }

    #[test]
    fn schema_requires_core_fields() {
        let schema = transaction_schema();
        let required = schema["properties"]["transactions"]["items"]["required"]
            .as_array()
            .unwrap();
        for field in ["transaction_date", "merchant", "original_amount", "type"] {
            assert!(required.iter().any(|v| v == field));
        }
    }
}
