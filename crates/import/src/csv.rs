use thiserror::Error;

use crate::bank::BankProfile;
use crate::row::{ParseOutcome, RawRow, RowSkipReason};
use crate::util::strip_bom;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Statement has {0} line(s) of content; need a header and at least one row")]
    Format(usize),
    #[error("Delimiter {0:?} is not a single-byte character")]
    Delimiter(char),
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
}

struct Record {
    line: usize,
    fields: Vec<String>,
}

/// Read every non-blank record, trimming fields. Invalid UTF-8 is replaced
/// rather than rejected so one bad byte does not lose the whole export.
fn read_records(data: &[u8], delimiter: u8) -> Result<Vec<Record>, ParseError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(strip_bom(data));

    let mut records = Vec::new();
    for (idx, result) in reader.byte_records().enumerate() {
        let record = result?;
        let fields: Vec<String> = record
            .iter()
            .map(|f| String::from_utf8_lossy(f).trim().to_string())
            .collect();
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 1);
        records.push(Record { line, fields });
    }
    Ok(records)
}

/// Split a delimited bank export into raw rows.
///
/// The first record is the header. Rows too short to reach the profile's
/// date/description/amount columns, or shorter than its minimum field count, are
/// skipped and recorded; they never abort the file.
pub fn parse_delimited(data: &[u8], profile: &BankProfile) -> Result<ParseOutcome, ParseError> {
    let delimiter =
        u8::try_from(profile.delimiter).map_err(|_| ParseError::Delimiter(profile.delimiter))?;
    let records = read_records(data, delimiter)?;

    tracing::debug!(bank = %profile.name, lines = records.len(), "read delimited statement");

    if records.len() < 2 {
        return Err(ParseError::Format(records.len()));
    }

    let columns = profile.resolve_columns(&records[0].fields);
    let required = columns.required_fields().max(profile.min_fields);
    tracing::debug!(?columns, required, "resolved columns");

    let mut outcome = ParseOutcome::default();
    for record in records.into_iter().skip(1) {
        let Record { line, fields } = record;
        if fields.len() < required {
            outcome.skip(
                line,
                RowSkipReason::TooFewFields {
                    found: fields.len(),
                    required,
                },
            );
            continue;
        }

        let optional = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| fields.get(i))
                .filter(|s| !s.is_empty())
                .cloned()
        };
        let currency = optional(columns.currency);
        let direction = optional(columns.direction);

        outcome.rows.push(RawRow {
            line,
            date: fields[columns.date].clone(),
            description: fields[columns.description].clone(),
            amount: fields[columns.amount].clone(),
            currency,
            direction,
            details: None,
        });
    }

    tracing::info!(
        bank = %profile.name,
        rows = outcome.rows.len(),
        skipped = outcome.skipped.len(),
        "parsed delimited statement"
    );
    Ok(outcome)
}
