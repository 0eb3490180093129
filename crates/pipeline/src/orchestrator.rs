use chrono::Utc;
use kesef_core::{
    Money, NewTransaction, Statement, StatementFormat, StatementId, StatementStatus,
    StatementTotals,
};
use kesef_import::{
    parse_delimited, parse_document, BankRegistry, Categorizer, ExtractionBackend,
    ExtractionError, Normalizer, ParseError, ParseOutcome, RowSkip,
};
use kesef_storage::StorageError;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::notify::{StatusNotifier, StatusUpdate};
use crate::traits::{FileStore, StatementStore};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Pending,
    Downloading,
    Parsing,
    Persisting,
    Completed,
    Failed,
}

impl ProcessingStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStage::Completed | ProcessingStage::Failed)
    }

    /// Persisted status a stage corresponds to.
    pub fn status(self) -> StatementStatus {
        match self {
            ProcessingStage::Completed => StatementStatus::Completed,
            ProcessingStage::Failed => StatementStatus::Failed,
            _ => StatementStatus::Processing,
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStage::Pending => write!(f, "pending"),
            ProcessingStage::Downloading => write!(f, "downloading"),
            ProcessingStage::Parsing => write!(f, "parsing"),
            ProcessingStage::Persisting => write!(f, "persisting"),
            ProcessingStage::Completed => write!(f, "completed"),
            ProcessingStage::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Statement {0} not found")]
    NotFound(StatementId),
    #[error("Statement {0} has already failed")]
    AlreadyFailed(StatementId),
    #[error("Failed to load statement: {0}")]
    Load(#[source] StorageError),
    #[error("Failed to download file: {0}")]
    Download(#[source] StorageError),
    #[error("Failed to parse statement: {0}")]
    Parse(#[from] ParseError),
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Failed to persist transactions: {0}")]
    Persist(#[source] StorageError),
    #[error("Statement {0} was marked failed while it was being processed")]
    Superseded(StatementId),
    #[error("Processing timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ProcessError {
    /// Whether the statement row should be moved to `failed` for this error.
    fn records_failure(&self) -> bool {
        !matches!(
            self,
            ProcessError::NotFound(_) | ProcessError::AlreadyFailed(_) | ProcessError::Superseded(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub statement_id: StatementId,
    pub transactions_count: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_income: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_expenses: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_cashflow: Decimal,
    pub skipped_rows: usize,
    pub skipped: Vec<RowSkip>,
}

impl ProcessSummary {
    fn new(statement_id: StatementId, count: usize, totals: StatementTotals, skipped: Vec<RowSkip>) -> Self {
        Self {
            statement_id,
            transactions_count: count,
            total_income: totals.income.as_decimal(),
            total_expenses: totals.expenses.as_decimal(),
            net_cashflow: totals.net.as_decimal(),
            skipped_rows: skipped.len(),
            skipped,
        }
    }
}

/// Result of one `process` call. Serializes with a `success` flag so callers
/// can branch without inspecting the shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Success(ProcessSummary),
    Failure { error: String },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success(_))
    }
}

impl Serialize for ProcessOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Success<'a> {
            success: bool,
            #[serde(flatten)]
            summary: &'a ProcessSummary,
        }
        #[derive(Serialize)]
        struct Failure<'a> {
            success: bool,
            error: &'a str,
        }

        match self {
            ProcessOutcome::Success(summary) => Success {
                success: true,
                summary,
            }
            .serialize(serializer),
            ProcessOutcome::Failure { error } => Failure {
                success: false,
                error,
            }
            .serialize(serializer),
        }
    }
}

/// Drives one statement from its stored file to persisted transactions:
/// download, parse, normalize and categorize, persist, complete.
pub struct StatementProcessor<S, F, E> {
    store: S,
    files: F,
    extractor: Option<E>,
    banks: BankRegistry,
    categorizer: Categorizer,
    timeout: Duration,
    notifier: Option<StatusNotifier>,
}

impl<S, F, E> StatementProcessor<S, F, E>
where
    S: StatementStore,
    F: FileStore,
    E: ExtractionBackend,
{
    pub fn new(store: S, files: F, extractor: Option<E>) -> Self {
        Self {
            store,
            files,
            extractor,
            banks: BankRegistry::builtin(),
            categorizer: Categorizer::default(),
            timeout: DEFAULT_TIMEOUT,
            notifier: None,
        }
    }

    pub fn with_banks(mut self, banks: BankRegistry) -> Self {
        self.banks = banks;
        self
    }

    pub fn with_categorizer(mut self, categorizer: Categorizer) -> Self {
        self.categorizer = categorizer;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_notifier(mut self, notifier: StatusNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn enter(&self, id: StatementId, stage: ProcessingStage, message: Option<String>) {
        match stage {
            ProcessingStage::Failed => {
                tracing::error!(statement_id = %id, error = message.as_deref().unwrap_or(""), "statement failed")
            }
            ProcessingStage::Completed => tracing::info!(statement_id = %id, "statement completed"),
            _ => tracing::debug!(statement_id = %id, %stage, "stage"),
        }
        if let Some(notifier) = &self.notifier {
            notifier.publish(StatusUpdate {
                statement_id: id,
                stage,
                status: stage.status(),
                message,
            });
        }
    }

    /// Process a registered statement. Never returns an error: every failure is
    /// written to the statement (where possible) and reported in the outcome.
    pub async fn process(&self, id: StatementId) -> ProcessOutcome {
        self.enter(id, ProcessingStage::Pending, None);

        match self.try_process(id).await {
            Ok(summary) => {
                self.enter(id, ProcessingStage::Completed, None);
                ProcessOutcome::Success(summary)
            }
            Err(e) => {
                let message = e.to_string();
                if e.records_failure() {
                    match self.store.fail_statement(id, &message).await {
                        Ok(true) => {}
                        Ok(false) => tracing::warn!(statement_id = %id, "statement was not processing; failure not recorded"),
                        Err(store_err) => tracing::error!(statement_id = %id, error = %store_err, "could not record failure"),
                    }
                }
                self.enter(id, ProcessingStage::Failed, Some(message.clone()));
                ProcessOutcome::Failure { error: message }
            }
        }
    }

    async fn try_process(&self, id: StatementId) -> Result<ProcessSummary, ProcessError> {
        let statement = self
            .store
            .get_statement(id)
            .await
            .map_err(ProcessError::Load)?
            .ok_or(ProcessError::NotFound(id))?;

        if statement.status == StatementStatus::Failed {
            return Err(ProcessError::AlreadyFailed(id));
        }
        if !statement.status.can_transition_to(StatementStatus::Completed) {
            tracing::warn!(statement_id = %id, "re-processing a completed statement; rows will be inserted again");
        }

        match tokio::time::timeout(self.timeout, self.run(&statement)).await {
            Ok(result) => result,
            Err(_) => Err(ProcessError::Timeout(self.timeout)),
        }
    }

    async fn run(&self, statement: &Statement) -> Result<ProcessSummary, ProcessError> {
        let id = statement.id;

        self.enter(id, ProcessingStage::Downloading, None);
        let bytes = self
            .files
            .fetch(&statement.file_location)
            .await
            .map_err(ProcessError::Download)?;

        self.enter(id, ProcessingStage::Parsing, None);
        let profile = self.banks.get(&statement.bank_name);
        let mut outcome: ParseOutcome = match statement.format {
            StatementFormat::Csv => parse_delimited(&bytes, profile)?,
            StatementFormat::Pdf => {
                let backend = self
                    .extractor
                    .as_ref()
                    .ok_or(ExtractionError::NotConfigured)?;
                parse_document(backend, &bytes, statement.format.mime_type()).await?
            }
        };

        let normalizer = Normalizer::new(profile, &statement.currency);
        let rows = std::mem::take(&mut outcome.rows);
        let mut transactions: Vec<NewTransaction> = Vec::with_capacity(rows.len());
        for row in &rows {
            match normalizer.normalize(row) {
                Ok(normalized) => {
                    let category = self.categorizer.category_for(&normalized);
                    transactions.push(normalized.into_new_transaction(
                        &statement.owner,
                        id,
                        category,
                        &statement.bank_name,
                    ));
                }
                Err(reason) => outcome.skip(row.line, reason),
            }
        }

        self.enter(id, ProcessingStage::Persisting, None);
        let totals = StatementTotals::from_transactions(&transactions);
        let completed = self
            .store
            .persist_statement(id, &transactions, &totals, Utc::now())
            .await
            .map_err(ProcessError::Persist)?;
        if !completed {
            return Err(ProcessError::Superseded(id));
        }

        tracing::info!(
            statement_id = %id,
            transactions = transactions.len(),
            skipped = outcome.skipped.len(),
            income = %totals.income,
            expenses = %totals.expenses,
            "persisted statement"
        );
        debug_assert_eq!(totals.income - totals.expenses, totals.net);
        debug_assert!(transactions.iter().all(|t| t.original_amount >= Money::zero()));

        Ok(ProcessSummary::new(id, transactions.len(), totals, outcome.skipped))
    }
}
