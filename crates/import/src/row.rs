use kesef_core::TransactionKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::ExtractionError;

/// One row as it came out of the file, before any interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// 1-based source line (delimited) or position in the extraction result.
    pub line: usize,
    pub date: String,
    pub description: String,
    pub amount: String,
    pub currency: Option<String>,
    pub direction: Option<String>,
    /// Only present for rows from the document path.
    pub details: Option<ExtractedDetails>,
}

/// Fields the extraction capability can supply that a bank CSV export never carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDetails {
    pub payment_date: Option<String>,
    pub category: Option<String>,
    pub amount_base: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowSkipReason {
    #[error("insufficient columns: found {found}, need {required}")]
    TooFewFields { found: usize, required: usize },
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),
    #[error("invalid date: {0:?}")]
    InvalidDate(String),
    #[error("rejected extraction result: {0}")]
    Extraction(#[from] ExtractionError),
}

/// A dropped row with the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSkip {
    pub line: usize,
    #[serde(serialize_with = "serialize_reason")]
    pub reason: RowSkipReason,
}

fn serialize_reason<S: serde::Serializer>(reason: &RowSkipReason, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(reason)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub rows: Vec<RawRow>,
    pub skipped: Vec<RowSkip>,
}

impl ParseOutcome {
    pub fn skip(&mut self, line: usize, reason: RowSkipReason) {
        tracing::warn!(line, %reason, "skipping row");
        self.skipped.push(RowSkip { line, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_records_line_and_reason() {
        let mut outcome = ParseOutcome::default();
        outcome.skip(3, RowSkipReason::TooFewFields { found: 2, required: 4 });
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].line, 3);
        assert_eq!(
            outcome.skipped[0].reason.to_string(),
            "insufficient columns: found 2, need 4"
        );
    }
}
