use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::money::Money;
use super::period::DateRange;
use super::transaction::{Direction, NewTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementId(pub i64);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared layout of the uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementFormat {
    /// Delimited text (CSV export).
    Csv,
    /// Unstructured document handed to the extraction capability.
    Pdf,
}

impl StatementFormat {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "txt" => Some(StatementFormat::Csv),
            "pdf" => Some(StatementFormat::Pdf),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            StatementFormat::Csv => "text/csv",
            StatementFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            StatementFormat::Csv => "csv",
            StatementFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for StatementFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for StatementFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(StatementFormat::Csv),
            "pdf" => Ok(StatementFormat::Pdf),
            other => Err(format!("Unknown statement format: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementStatus {
    Processing,
    Completed,
    Failed,
}

impl StatementStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StatementStatus::Processing)
    }

    /// Only a `processing` statement may move, and only to a terminal status.
    pub fn can_transition_to(self, next: StatementStatus) -> bool {
        matches!(
            (self, next),
            (StatementStatus::Processing, StatementStatus::Completed)
                | (StatementStatus::Processing, StatementStatus::Failed)
        )
    }
}

impl fmt::Display for StatementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementStatus::Processing => write!(f, "processing"),
            StatementStatus::Completed => write!(f, "completed"),
            StatementStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for StatementStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(StatementStatus::Processing),
            "completed" => Ok(StatementStatus::Completed),
            "failed" => Ok(StatementStatus::Failed),
            other => Err(format!("Unknown statement status: '{other}'")),
        }
    }
}

/// Aggregate figures written when a statement completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementTotals {
    pub income: Money,
    pub expenses: Money,
    /// Always `income - expenses`.
    pub net: Money,
}

impl StatementTotals {
    pub fn new(income: Money, expenses: Money) -> Self {
        StatementTotals {
            income,
            expenses,
            net: income - expenses,
        }
    }

    pub fn from_transactions(transactions: &[NewTransaction]) -> Self {
        let sum_for = |direction: Direction| {
            transactions
                .iter()
                .filter(|t| t.direction == direction)
                .map(|t| t.original_amount)
                .sum::<Money>()
        };
        Self::new(sum_for(Direction::Income), sum_for(Direction::Expense))
    }
}

/// What a client supplies when it registers an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStatement {
    pub owner: String,
    pub bank_name: String,
    pub file_location: String,
    pub format: StatementFormat,
    pub currency: String,
    pub period: DateRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub owner: String,
    pub bank_name: String,
    pub file_location: String,
    pub format: StatementFormat,
    pub currency: String,
    pub period: DateRange,
    pub status: StatementStatus,
    /// Only set once the statement is completed.
    pub totals: Option<StatementTotals>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
