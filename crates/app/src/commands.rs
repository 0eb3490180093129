use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use kesef_core::{
    Category, DateRange, IncomeExpenseSummary, NewStatement, StatementFormat, StatementId,
};
use kesef_import::{BankRegistry, Categorizer};
use kesef_pipeline::{
    ChatCompletionsExtractor, Milestone, ProcessOutcome, ProgressError, ProgressState,
    ProgressTracker, ProgressUpdate, StatementProcessor, StatusNotifier, StatusPoller,
};
use kesef_storage::{ObjectStore, SqliteStore};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::Config;

pub const STALE_MESSAGE: &str = "Processing did not finish in time";

type Processor = StatementProcessor<SqliteStore, ObjectStore, ChatCompletionsExtractor>;

/// Everything a command needs, opened once from the config.
pub struct AppState {
    pub config: Config,
    pub store: SqliteStore,
    /// Root of the content-addressed statement file store (`<data_dir>/statements/`).
    pub objects: ObjectStore,
    pub banks: BankRegistry,
    pub categorizer: Categorizer,
    pub extractor: Option<ChatCompletionsExtractor>,
}

impl AppState {
    pub async fn open(config: Config) -> Result<Self> {
        let data_dir = config.resolve_data_dir()?;
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("create data directory {}", data_dir.display()))?;

        let db_path = data_dir.join("kesef.db");
        let store = SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("open database {}", db_path.display()))?;
        let objects = ObjectStore::new(data_dir.join("statements"));

        let banks = match &config.banks_file {
            Some(path) => BankRegistry::from_toml(&read_text(path)?)
                .with_context(|| format!("load bank profiles from {}", path.display()))?,
            None => BankRegistry::builtin(),
        };
        let categorizer = match &config.rules_file {
            Some(path) => Categorizer::from_toml(&read_text(path)?)
                .with_context(|| format!("load category rules from {}", path.display()))?,
            None => Categorizer::default(),
        };
        let extractor = build_extractor(&config)?;

        tracing::debug!(data_dir = %data_dir.display(), extraction = extractor.is_some(), "opened kesef");
        Ok(Self {
            config,
            store,
            objects,
            banks,
            categorizer,
            extractor,
        })
    }

    fn processor(&self, notifier: Option<StatusNotifier>) -> Processor {
        let processor = StatementProcessor::new(
            self.store.clone(),
            self.objects.clone(),
            self.extractor.clone(),
        )
        .with_banks(self.banks.clone())
        .with_categorizer(self.categorizer.clone())
        .with_timeout(self.config.processing_timeout());
        match notifier {
            Some(notifier) => processor.with_notifier(notifier),
            None => processor,
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn build_extractor(config: &Config) -> Result<Option<ChatCompletionsExtractor>> {
    let Some(extraction) = &config.extraction else {
        return Ok(None);
    };
    let Some(api_key) = extraction.api_key() else {
        tracing::warn!(
            variable = %extraction.api_key_env,
            "extraction is configured but its API key variable is unset; PDF statements will fail"
        );
        return Ok(None);
    };
    let extractor = ChatCompletionsExtractor::new(
        &extraction.endpoint,
        &extraction.model,
        &api_key,
        std::time::Duration::from_secs(extraction.request_timeout_secs),
    )
    .context("build extraction client")?;
    Ok(Some(extractor))
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub owner: String,
    pub bank: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug)]
pub struct UploadReport {
    pub statement_id: StatementId,
    pub outcome: ProcessOutcome,
    pub progress: ProgressState,
}

fn advance(tracker: &mut ProgressTracker, update: ProgressUpdate) {
    if tracker.apply(update) {
        let state = tracker.state();
        tracing::info!(status = ?state.status, percent = state.percent, "upload progress");
    }
}

async fn join_listener(listener: JoinHandle<()>) {
    if let Err(e) = listener.await {
        tracing::warn!(error = %e, "stage listener ended abnormally");
    }
}

/// Store a statement file, register it and process it in one go.
pub async fn upload(state: &AppState, request: UploadRequest) -> Result<UploadReport> {
    let mut tracker = ProgressTracker::new();
    advance(&mut tracker, ProgressUpdate::milestone(Milestone::UploadStarted));

    let file_name = request
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} is not a file", request.path.display()))?;
    let format = StatementFormat::from_file_name(&file_name)
        .ok_or_else(|| anyhow!("unsupported file type {file_name}: expected .csv or .pdf"))?;

    let size = tokio::fs::metadata(&request.path)
        .await
        .with_context(|| format!("stat {}", request.path.display()))?
        .len();
    if size == 0 {
        bail!("{file_name} is empty");
    }
    if size > state.config.max_upload_bytes {
        bail!(
            "{file_name} is {size} bytes; the upload limit is {} bytes",
            state.config.max_upload_bytes
        );
    }

    let data = tokio::fs::read(&request.path)
        .await
        .with_context(|| format!("read {}", request.path.display()))?;
    let location = state
        .objects
        .put(&request.owner, &data, format.extension())
        .await
        .context("store statement file")?;
    advance(&mut tracker, ProgressUpdate::milestone(Milestone::FileStored));

    let bank_name = request
        .bank
        .unwrap_or_else(|| state.banks.detect_from_file_name(&file_name).to_string());
    let currency = request
        .currency
        .unwrap_or_else(|| state.config.default_currency.clone())
        .to_uppercase();
    let statement = NewStatement {
        owner: request.owner,
        bank_name,
        file_location: location,
        format,
        currency,
        period: DateRange::single(Utc::now().date_naive()),
    };
    let statement_id = kesef_storage::insert_statement(state.store.pool(), &statement)
        .await
        .context("register statement")?;
    advance(&mut tracker, ProgressUpdate::milestone(Milestone::StatementRegistered));

    let notifier = StatusNotifier::default();
    let mut updates = notifier.subscribe();
    let listener = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => tracing::debug!(
                    statement_id = %update.statement_id,
                    stage = %update.stage,
                    "stage reached"
                ),
                Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "missed stage updates"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    advance(&mut tracker, ProgressUpdate::milestone(Milestone::ProcessingInvoked));
    let outcome = state.processor(Some(notifier)).process(statement_id).await;
    // The processor (and its notifier) is gone once `process` returns.
    join_listener(listener).await;

    let stored = kesef_storage::get_statement(state.store.pool(), statement_id)
        .await
        .context("read back statement")?;
    match &stored {
        Some(statement) => advance(&mut tracker, ProgressUpdate::from(statement)),
        None => bail!("statement {statement_id} vanished while processing"),
    }

    Ok(UploadReport {
        statement_id,
        outcome,
        progress: tracker.state().clone(),
    })
}

pub async fn process(state: &AppState, id: StatementId) -> ProcessOutcome {
    state.processor(None).process(id).await
}

/// Poll a statement until it reaches a terminal status.
pub async fn status(state: &AppState, id: StatementId) -> Result<ProgressState> {
    let mut tracker = ProgressTracker::new();
    let mut poller = StatusPoller::new(
        &state.store,
        state.config.poll_interval(),
        state.config.processing_timeout(),
    );
    match poller.wait_for_terminal(id, &mut tracker).await {
        Ok(progress) => Ok(progress),
        Err(err @ ProgressError::NotFound(_)) => Err(err.into()),
        Err(err @ ProgressError::Stuck { .. }) => {
            Err(anyhow::Error::new(err).context("try `kesef sweep` once it is stale"))
        }
    }
}

/// Fail statements left in `processing` for longer than `stale_after_secs`.
pub async fn sweep(state: &AppState) -> Result<u64> {
    let stale_after = chrono::Duration::from_std(state.config.stale_after())
        .context("stale_after_secs is out of range")?;
    let cutoff = Utc::now() - stale_after;
    let swept = kesef_storage::fail_stale_statements(state.store.pool(), cutoff, STALE_MESSAGE)
        .await
        .context("sweep stale statements")?;
    Ok(swept)
}

/// Either bound may be left open.
pub fn summary_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Option<DateRange> {
    if from.is_none() && to.is_none() {
        return None;
    }
    let earliest = NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN);
    let latest = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX);
    Some(DateRange::new(
        from.unwrap_or(earliest),
        to.unwrap_or(latest),
    ))
}

pub async fn summary(
    state: &AppState,
    owner: &str,
    range: Option<DateRange>,
) -> Result<IncomeExpenseSummary> {
    let transactions = kesef_storage::get_transactions_for_owner(state.store.pool(), owner, range)
        .await
        .context("load transactions")?;
    Ok(IncomeExpenseSummary::from_transactions(&transactions))
}

pub async fn categories(state: &AppState) -> Result<Vec<Category>> {
    kesef_storage::get_categories(state.store.pool())
        .await
        .context("load categories")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kesef_core::{Direction, StatementStatus};
    use kesef_pipeline::ProgressStatus;
    use rust_decimal::Decimal;

    const SCENARIO: &str =
        "date,x,y,description,amount,currency,direction\n05/03/2024,a,b,Salary Transfer,5000,ILS,זיכוי\n";

    async fn open(dir: &Path) -> AppState {
        let config = Config {
            data_dir: Some(dir.join("data")),
            ..Config::default()
        };
        AppState::open(config).await.unwrap()
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn request(path: PathBuf) -> UploadRequest {
        UploadRequest {
            path,
            owner: "owner-1".to_string(),
            bank: None,
            currency: None,
        }
    }

    #[tokio::test]
    async fn panicking_listener_does_not_abort_upload() {
        let listener = tokio::spawn(async { panic!("listener bug") });
        join_listener(listener).await;
    }

    #[tokio::test]
    async fn upload_detects_bank_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let state = open(dir.path()).await;
        let path = write_file(dir.path(), "OneZero_2024_03.csv", SCENARIO.as_bytes());

        let report = upload(&state, request(path)).await.unwrap();
        assert!(report.outcome.is_success());
        assert_eq!(report.progress.status, ProgressStatus::Completed);
        assert_eq!(report.progress.percent, 100);

        let statement = kesef_storage::get_statement(state.store.pool(), report.statement_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(statement.bank_name, "One Zero");
        assert_eq!(statement.currency, "ILS");
        assert_eq!(statement.status, StatementStatus::Completed);

        let stored = state.objects.fetch(&statement.file_location).await.unwrap();
        assert_eq!(stored, SCENARIO.as_bytes());

        let rows = kesef_storage::get_transactions_for_statement(state.store.pool(), report.statement_id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data.category, "Salary");
        assert_eq!(rows[0].data.direction, Direction::Income);
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_and_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = open(dir.path()).await;

        let jpg = write_file(dir.path(), "photo.jpg", b"hello");
        let err = upload(&state, request(jpg)).await.unwrap_err();
        assert!(err.to_string().contains("unsupported file type"));

        let empty = write_file(dir.path(), "empty.csv", b"");
        assert!(upload(&state, request(empty)).await.is_err());

        state.config.max_upload_bytes = 10;
        let big = write_file(dir.path(), "big.csv", SCENARIO.as_bytes());
        let err = upload(&state, request(big)).await.unwrap_err();
        assert!(err.to_string().contains("upload limit"));

        let none = kesef_storage::list_statements(state.store.pool(), "owner-1")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn pdf_without_extractor_fails_the_statement() {
        let dir = tempfile::tempdir().unwrap();
        let state = open(dir.path()).await;
        let pdf = write_file(dir.path(), "statement.pdf", b"%PDF-1.4");

        let report = upload(&state, request(pdf)).await.unwrap();
        assert!(!report.outcome.is_success());
        assert_eq!(report.progress.status, ProgressStatus::Failed);
        assert!(report.progress.error.is_some());
    }

    #[tokio::test]
    async fn status_reports_terminal_statement() {
        let dir = tempfile::tempdir().unwrap();
        let state = open(dir.path()).await;
        let path = write_file(dir.path(), "OneZero.csv", SCENARIO.as_bytes());
        let report = upload(&state, request(path)).await.unwrap();

        let progress = status(&state, report.statement_id).await.unwrap();
        assert_eq!(progress.status, ProgressStatus::Completed);

        let missing = status(&state, StatementId(9_999)).await.unwrap_err();
        assert!(missing.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn sweep_fails_only_stale_statements() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = open(dir.path()).await;
        let statement = NewStatement {
            owner: "owner-1".into(),
            bank_name: "One Zero".into(),
            file_location: "owner-1/x.csv".into(),
            format: StatementFormat::Csv,
            currency: "ILS".into(),
            period: DateRange::single(Utc::now().date_naive()),
        };
        let id = kesef_storage::insert_statement(state.store.pool(), &statement)
            .await
            .unwrap();

        assert_eq!(sweep(&state).await.unwrap(), 0);

        state.config.stale_after_secs = 0;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sweep(&state).await.unwrap(), 1);

        let swept = kesef_storage::get_statement(state.store.pool(), id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(swept.status, StatementStatus::Failed);
        assert_eq!(swept.error_message.as_deref(), Some(STALE_MESSAGE));
    }

    #[tokio::test]
    async fn summary_over_uploaded_statement() {
        let dir = tempfile::tempdir().unwrap();
        let state = open(dir.path()).await;
        let path = write_file(dir.path(), "OneZero.csv", SCENARIO.as_bytes());
        upload(&state, request(path)).await.unwrap();

        let all = summary(&state, "owner-1", None).await.unwrap();
        assert_eq!(all.total_income.as_decimal(), Decimal::from(5000));
        assert!(all.total_expenses.is_zero());

        let april = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let later = summary(&state, "owner-1", summary_range(Some(april), None))
            .await
            .unwrap();
        assert!(later.total_income.is_zero());

        let end_of_march = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let until_march = summary(&state, "owner-1", summary_range(None, Some(end_of_march)))
            .await
            .unwrap();
        assert_eq!(until_march.total_income.as_decimal(), Decimal::from(5000));
    }

    #[test]
    fn open_bounds_fill_in() {
        assert_eq!(summary_range(None, None), None);
        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let range = summary_range(Some(d), None).unwrap();
        assert_eq!(range.start, d);
        assert!(range.contains(NaiveDate::from_ymd_opt(2500, 1, 1).unwrap()));
    }

    #[tokio::test]
    async fn categories_are_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let state = open(dir.path()).await;
        let names: Vec<String> = categories(&state)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.iter().any(|n| n == "Salary"));
        assert!(names.iter().any(|n| n == "Other"));
    }

    #[tokio::test]
    async fn rules_file_overrides_categorizer() {
        let dir = tempfile::tempdir().unwrap();
        let rules = write_file(
            dir.path(),
            "rules.toml",
            "[[rule]]\ncategory = \"Payroll\"\nkeywords = [\"salary\"]\ndirection = \"income\"\npriority = 10\n"
                .as_bytes(),
        );
        let config = Config {
            data_dir: Some(dir.path().join("data")),
            rules_file: Some(rules),
            ..Config::default()
        };
        let state = AppState::open(config).await.unwrap();
        let path = write_file(dir.path(), "OneZero.csv", SCENARIO.as_bytes());
        let report = upload(&state, request(path)).await.unwrap();

        let rows = kesef_storage::get_transactions_for_statement(state.store.pool(), report.statement_id)
            .await
            .unwrap();
        assert_eq!(rows[0].data.category, "Payroll");
    }
}
