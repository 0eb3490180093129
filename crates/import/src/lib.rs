pub mod bank;
pub mod csv;
pub mod document;
pub mod normalize;
pub mod row;
pub mod rules;
pub(crate) mod util;

pub use bank::{BankConfigError, BankProfile, BankRegistry, ColumnAliases, ColumnMap, ColumnPositions, UNKNOWN_BANK};
pub use crate::csv::{parse_delimited, ParseError};
pub use document::{
    parse_document, transaction_schema, ExtractedRow, ExtractionBackend, ExtractionError,
    ExtractionRequest, ExtractionResponse, LooseNumber, MockExtractor, EXTRACTION_INSTRUCTION,
};
pub use normalize::{
    clean_merchant, normalize_date, parse_amount, NormalizedTransaction, Normalizer,
    UNKNOWN_MERCHANT,
};
pub use row::{ExtractedDetails, ParseOutcome, RawRow, RowSkip, RowSkipReason};
pub use rules::{default_rules, CategoryRule, Categorizer, MatchType, RulesError};
