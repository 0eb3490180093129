use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::money::Money;
use super::statement::StatementId;

/// Income vs. expense. Orthogonal to [`TransactionKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Income,
    Expense,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Income => write!(f, "income"),
            Direction::Expense => write!(f, "expense"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(Direction::Income),
            "expense" => Ok(Direction::Expense),
            other => Err(format!("Unknown direction: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    #[default]
    Regular,
    Refund,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Regular => write!(f, "regular"),
            TransactionKind::Refund => write!(f, "refund"),
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Ok(TransactionKind::Regular),
            "refund" => Ok(TransactionKind::Refund),
            other => Err(format!("Unknown transaction type: '{other}'")),
        }
    }
}

/// A transaction as produced by the ingestion pipeline, before it has a row id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub owner: String,
    pub statement_id: StatementId,
    pub transaction_date: NaiveDate,
    pub payment_date: Option<NaiveDate>,
    pub merchant_name: String,
    pub category: String,
    /// Magnitude only; never negative.
    pub original_amount: Money,
    pub original_currency: String,
    /// Amount in the owner's base currency.
    pub amount_base: Money,
    pub direction: Direction,
    pub kind: TransactionKind,
    pub fee: Option<Money>,
    pub exchange_rate: Option<Decimal>,
    pub description: Option<String>,
    pub source_bank: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    #[serde(flatten)]
    pub data: NewTransaction,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn direction_parse_and_display() {
        assert_eq!(Direction::from_str(" Income ").unwrap(), Direction::Income);
        assert_eq!(Direction::Expense.to_string(), "expense");
        assert!(Direction::from_str("sideways").is_err());
    }

    #[test]
    fn kind_defaults_to_regular() {
        assert_eq!(TransactionKind::default(), TransactionKind::Regular);
        assert_eq!(
            TransactionKind::from_str("REFUND").unwrap(),
            TransactionKind::Refund
        );
    }

    #[test]
    fn direction_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Direction::Income).unwrap(),
            "\"income\""
        );
    }
}
