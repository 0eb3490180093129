use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use kesef_core::{
    Category, DateRange, Direction, Money, NewStatement, NewTransaction, Statement, StatementId,
    StatementStatus, StatementTotals, Transaction, DEFAULT_CATEGORIES,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::StorageError;

pub type DbPool = Pool<Sqlite>;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(5000))
        .pragma("cache_size", "-32000");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            icon TEXT NOT NULL,
            color TEXT NOT NULL,
            parent TEXT,
            FOREIGN KEY (parent) REFERENCES categories(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            bank_name TEXT NOT NULL,
            file_location TEXT NOT NULL,
            format TEXT NOT NULL CHECK (format IN ('csv', 'pdf')),
            currency TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing'
                CHECK (status IN ('processing', 'completed', 'failed')),
            total_income_cents INTEGER,
            total_expenses_cents INTEGER,
            net_cashflow_cents INTEGER,
            error_message TEXT,
            processed_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            statement_id INTEGER NOT NULL,
            transaction_date TEXT NOT NULL,
            payment_date TEXT,
            merchant_name TEXT NOT NULL,
            category TEXT NOT NULL,
            original_amount_cents INTEGER NOT NULL CHECK (original_amount_cents >= 0),
            original_currency TEXT NOT NULL,
            amount_base_cents INTEGER NOT NULL,
            direction TEXT NOT NULL CHECK (direction IN ('income', 'expense')),
            kind TEXT NOT NULL DEFAULT 'regular' CHECK (kind IN ('regular', 'refund')),
            fee_cents INTEGER,
            exchange_rate TEXT,
            description TEXT,
            source_bank TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (statement_id) REFERENCES statements(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_owner_date ON transactions (owner, transaction_date)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_statement ON transactions (statement_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_statements_status ON statements (status, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

// ── Column codecs ─────────────────────────────────────────────────────────────

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::Corrupt {
            column,
            value: value.to_string(),
        })
}

fn date_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(column: &'static str, value: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| StorageError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn parse_enum<T: FromStr>(column: &'static str, value: String) -> Result<T, StorageError> {
    value
        .parse()
        .map_err(|_| StorageError::Corrupt { column, value })
}

fn cents(amount: Money) -> Result<i64, StorageError> {
    amount
        .to_cents()
        .ok_or_else(|| StorageError::AmountOutOfRange(amount.to_string()))
}

fn optional_cents(amount: Option<Money>) -> Result<Option<i64>, StorageError> {
    amount.map(cents).transpose()
}

// ── Categories ────────────────────────────────────────────────────────────────

pub async fn seed_default_categories(pool: &DbPool) -> Result<(), sqlx::Error> {
    for &(name, icon, color, parent) in DEFAULT_CATEGORIES {
        sqlx::query("INSERT OR IGNORE INTO categories (name, icon, color, parent) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(icon)
            .bind(color)
            .bind(parent)
            .execute(pool)
            .await?;
    }

    Ok(())
}

pub async fn get_categories(pool: &DbPool) -> Result<Vec<Category>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String, String, String, Option<String>)>(
        "SELECT id, name, icon, color, parent FROM categories ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Category {
            id: Some(r.0),
            name: r.1,
            icon: r.2,
            color: r.3,
            parent: r.4,
        })
        .collect())
}

// ── Statements ────────────────────────────────────────────────────────────────

const STATEMENT_COLUMNS: &str = "id, owner, bank_name, file_location, format, currency, \
    period_start, period_end, status, total_income_cents, total_expenses_cents, \
    net_cashflow_cents, error_message, processed_at, created_at";

fn statement_from_row(row: &SqliteRow) -> Result<Statement, StorageError> {
    let income: Option<i64> = row.try_get("total_income_cents")?;
    let expenses: Option<i64> = row.try_get("total_expenses_cents")?;
    let net: Option<i64> = row.try_get("net_cashflow_cents")?;
    let totals = match (income, expenses, net) {
        (Some(i), Some(e), Some(n)) => Some(StatementTotals {
            income: Money::from_cents(i),
            expenses: Money::from_cents(e),
            net: Money::from_cents(n),
        }),
        _ => None,
    };

    let processed_at: Option<String> = row.try_get("processed_at")?;
    let created_at: String = row.try_get("created_at")?;
    let period_start: String = row.try_get("period_start")?;
    let period_end: String = row.try_get("period_end")?;

    Ok(Statement {
        id: StatementId(row.try_get("id")?),
        owner: row.try_get("owner")?,
        bank_name: row.try_get("bank_name")?,
        file_location: row.try_get("file_location")?,
        format: parse_enum("format", row.try_get("format")?)?,
        currency: row.try_get("currency")?,
        period: DateRange::new(
            parse_date("period_start", &period_start)?,
            parse_date("period_end", &period_end)?,
        ),
        status: parse_enum("status", row.try_get("status")?)?,
        totals,
        error_message: row.try_get("error_message")?,
        processed_at: processed_at
            .as_deref()
            .map(|p| parse_timestamp("processed_at", p))
            .transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

/// Register an uploaded statement. New statements start in `processing`.
pub async fn insert_statement(
    pool: &DbPool,
    statement: &NewStatement,
) -> Result<StatementId, StorageError> {
    let result = sqlx::query(
        "INSERT INTO statements (owner, bank_name, file_location, format, currency, period_start, period_end, status, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 'processing', ?)",
    )
    .bind(&statement.owner)
    .bind(&statement.bank_name)
    .bind(&statement.file_location)
    .bind(statement.format.to_string())
    .bind(&statement.currency)
    .bind(date_text(statement.period.start))
    .bind(date_text(statement.period.end))
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?;

    let id = StatementId(result.last_insert_rowid());
    tracing::info!(statement_id = %id, owner = %statement.owner, bank = %statement.bank_name, "registered statement");
    Ok(id)
}

pub async fn get_statement(
    pool: &DbPool,
    id: StatementId,
) -> Result<Option<Statement>, StorageError> {
    let row = sqlx::query(&format!("SELECT {STATEMENT_COLUMNS} FROM statements WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(statement_from_row).transpose()
}

/// Newest first.
pub async fn list_statements(pool: &DbPool, owner: &str) -> Result<Vec<Statement>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {STATEMENT_COLUMNS} FROM statements WHERE owner = ? ORDER BY created_at DESC, id DESC"
    ))
    .bind(owner)
    .fetch_all(pool)
    .await?;

    rows.iter().map(statement_from_row).collect()
}

/// Mark a statement completed with its totals. A failed statement is left
/// untouched; returns whether a row was updated.
async fn mark_completed(
    conn: &mut SqliteConnection,
    id: StatementId,
    totals: &StatementTotals,
    processed_at: DateTime<Utc>,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE statements SET status = 'completed', total_income_cents = ?, total_expenses_cents = ?, \
         net_cashflow_cents = ?, error_message = NULL, processed_at = ? \
         WHERE id = ? AND status <> 'failed'",
    )
    .bind(cents(totals.income)?)
    .bind(cents(totals.expenses)?)
    .bind(cents(totals.net)?)
    .bind(timestamp(processed_at))
    .bind(id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert a statement's rows and mark it completed in one database
/// transaction. Either both land or neither does: a failed statement gets no
/// rows, and any insert error leaves the statement as it was. Returns whether
/// the statement was completed.
pub async fn persist_statement(
    pool: &DbPool,
    id: StatementId,
    transactions: &[NewTransaction],
    totals: &StatementTotals,
    processed_at: DateTime<Utc>,
) -> Result<bool, StorageError> {
    let mut tx = pool.begin().await?;

    if !mark_completed(&mut *tx, id, totals, processed_at).await? {
        tx.rollback().await?;
        return Ok(false);
    }
    insert_rows(&mut *tx, transactions).await?;

    tx.commit().await?;
    tracing::debug!(statement_id = %id, rows = transactions.len(), "persisted statement");
    Ok(true)
}

/// Move a `processing` statement to `failed`. Terminal statements are left
/// untouched; returns whether a row was updated.
pub async fn fail_statement(
    pool: &DbPool,
    id: StatementId,
    message: &str,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE statements SET status = 'failed', error_message = ? WHERE id = ? AND status = 'processing'",
    )
    .bind(message)
    .bind(id.0)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fail every statement still `processing` that was registered before
/// `older_than`. Returns the number of statements swept.
pub async fn fail_stale_statements(
    pool: &DbPool,
    older_than: DateTime<Utc>,
    message: &str,
) -> Result<u64, StorageError> {
    let result = sqlx::query(
        "UPDATE statements SET status = 'failed', error_message = ? \
         WHERE status = 'processing' AND created_at < ?",
    )
    .bind(message)
    .bind(timestamp(older_than))
    .execute(pool)
    .await?;

    let swept = result.rows_affected();
    if swept > 0 {
        tracing::warn!(swept, cutoff = %timestamp(older_than), "failed stale statements");
    }
    Ok(swept)
}

/// Delete a statement together with its transactions.
pub async fn delete_statement(pool: &DbPool, id: StatementId) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM statements WHERE id = ?")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ── Transactions ──────────────────────────────────────────────────────────────

const TRANSACTION_COLUMNS: &str = "id, owner, statement_id, transaction_date, payment_date, \
    merchant_name, category, original_amount_cents, original_currency, amount_base_cents, \
    direction, kind, fee_cents, exchange_rate, description, source_bank, created_at";

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, StorageError> {
    let transaction_date: String = row.try_get("transaction_date")?;
    let payment_date: Option<String> = row.try_get("payment_date")?;
    let fee: Option<i64> = row.try_get("fee_cents")?;
    let exchange_rate: Option<String> = row.try_get("exchange_rate")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        data: NewTransaction {
            owner: row.try_get("owner")?,
            statement_id: StatementId(row.try_get("statement_id")?),
            transaction_date: parse_date("transaction_date", &transaction_date)?,
            payment_date: payment_date
                .as_deref()
                .map(|d| parse_date("payment_date", d))
                .transpose()?,
            merchant_name: row.try_get("merchant_name")?,
            category: row.try_get("category")?,
            original_amount: Money::from_cents(row.try_get("original_amount_cents")?),
            original_currency: row.try_get("original_currency")?,
            amount_base: Money::from_cents(row.try_get("amount_base_cents")?),
            direction: parse_enum("direction", row.try_get("direction")?)?,
            kind: parse_enum("kind", row.try_get("kind")?)?,
            fee: fee.map(Money::from_cents),
            exchange_rate: exchange_rate
                .map(|r| parse_enum::<Decimal>("exchange_rate", r))
                .transpose()?,
            description: row.try_get("description")?,
            source_bank: row.try_get("source_bank")?,
        },
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    transactions: &[NewTransaction],
) -> Result<(), StorageError> {
    let created_at = timestamp(Utc::now());

    for t in transactions {
        sqlx::query(
            "INSERT INTO transactions (owner, statement_id, transaction_date, payment_date, merchant_name, \
             category, original_amount_cents, original_currency, amount_base_cents, direction, kind, \
             fee_cents, exchange_rate, description, source_bank, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&t.owner)
        .bind(t.statement_id.0)
        .bind(date_text(t.transaction_date))
        .bind(t.payment_date.map(date_text))
        .bind(&t.merchant_name)
        .bind(&t.category)
        .bind(cents(t.original_amount)?)
        .bind(&t.original_currency)
        .bind(cents(t.amount_base)?)
        .bind(t.direction.to_string())
        .bind(t.kind.to_string())
        .bind(optional_cents(t.fee)?)
        .bind(t.exchange_rate.map(|r| r.to_string()))
        .bind(&t.description)
        .bind(&t.source_bank)
        .bind(&created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn get_transactions_for_statement(
    pool: &DbPool,
    statement_id: StatementId,
) -> Result<Vec<Transaction>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE statement_id = ? ORDER BY transaction_date, id"
    ))
    .bind(statement_id.0)
    .fetch_all(pool)
    .await?;

    rows.iter().map(transaction_from_row).collect()
}

/// All of an owner's transactions, optionally limited to an inclusive date range.
pub async fn get_transactions_for_owner(
    pool: &DbPool,
    owner: &str,
    range: Option<DateRange>,
) -> Result<Vec<Transaction>, StorageError> {
    let rows = match range {
        Some(range) => {
            sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                 WHERE owner = ? AND transaction_date >= ? AND transaction_date <= ? \
                 ORDER BY transaction_date, id"
            ))
            .bind(owner)
            .bind(date_text(range.start))
            .bind(date_text(range.end))
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE owner = ? ORDER BY transaction_date, id"
            ))
            .bind(owner)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(transaction_from_row).collect()
}

/// User correction of a single transaction's category.
pub async fn update_transaction_category(
    pool: &DbPool,
    id: i64,
    category: &str,
) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE transactions SET category = ? WHERE id = ?")
        .bind(category)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Pool handle shared by the pipeline's persistence seam.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let pool = create_db(path).await?;
        seed_default_categories(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Persisted totals by direction for one statement, in original amounts.
    pub async fn statement_sums(&self, id: StatementId) -> Result<StatementTotals, StorageError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT direction, COALESCE(SUM(original_amount_cents), 0) FROM transactions \
             WHERE statement_id = ? GROUP BY direction",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut income = Money::zero();
        let mut expenses = Money::zero();
        for (direction, sum) in rows {
            match parse_enum::<Direction>("direction", direction)? {
                Direction::Income => income = Money::from_cents(sum),
                Direction::Expense => expenses = Money::from_cents(sum),
            }
        }
        Ok(StatementTotals::new(income, expenses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kesef_core::{StatementFormat, TransactionKind};

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("kesef.db")).await.unwrap();
        (dir, store)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_statement(owner: &str) -> NewStatement {
        NewStatement {
            owner: owner.into(),
            bank_name: "One Zero".into(),
            file_location: format!("{owner}/abc.csv"),
            format: StatementFormat::Csv,
            currency: "ILS".into(),
            period: DateRange::new(date(2024, 3, 1), date(2024, 3, 31)),
        }
    }

    async fn persist(store: &SqliteStore, id: StatementId, rows: &[NewTransaction]) -> Result<bool, StorageError> {
        let totals = StatementTotals::from_transactions(rows);
        persist_statement(store.pool(), id, rows, &totals, Utc::now()).await
    }

    fn tx(statement_id: StatementId, day: u32, direction: Direction, cents: i64) -> NewTransaction {
        NewTransaction {
            owner: "u1".into(),
            statement_id,
            transaction_date: date(2024, 3, day),
            payment_date: None,
            merchant_name: "Shop".into(),
            category: "Other".into(),
            original_amount: Money::from_cents(cents),
            original_currency: "ILS".into(),
            amount_base: Money::from_cents(cents),
            direction,
            kind: TransactionKind::Regular,
            fee: None,
            exchange_rate: None,
            description: Some("Shop 123".into()),
            source_bank: Some("One Zero".into()),
        }
    }

    #[tokio::test]
    async fn categories_seed_idempotently() {
        let (_dir, store) = test_store().await;
        seed_default_categories(store.pool()).await.unwrap();
        let cats = get_categories(store.pool()).await.unwrap();
        assert_eq!(cats.len(), DEFAULT_CATEGORIES.len());
        let groceries = cats.iter().find(|c| c.name == "Groceries").unwrap();
        assert_eq!(groceries.parent.as_deref(), Some("Food & Dining"));
    }

    #[tokio::test]
    async fn statement_round_trip() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        let s = get_statement(store.pool(), id).await.unwrap().unwrap();
        assert_eq!(s.status, StatementStatus::Processing);
        assert_eq!(s.format, StatementFormat::Csv);
        assert_eq!(s.period.end, date(2024, 3, 31));
        assert!(s.totals.is_none());
        assert!(get_statement(store.pool(), StatementId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transactions_round_trip_with_optional_fields() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        let mut t = tx(id, 5, Direction::Expense, 479_59);
        t.payment_date = Some(date(2024, 4, 2));
        t.fee = Some(Money::from_cents(150));
        t.exchange_rate = Some(Decimal::from_str("3.98").unwrap());
        t.kind = TransactionKind::Refund;
        assert!(persist(&store, id, &[t.clone()]).await.unwrap());

        let stored = get_transactions_for_statement(store.pool(), id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].data, t);
    }

    #[tokio::test]
    async fn insert_error_leaves_statement_processing_without_rows() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        let good = tx(id, 1, Direction::Expense, 100);
        // Second row references a statement that does not exist.
        let bad = tx(StatementId(999), 2, Direction::Expense, 100);
        assert!(persist(&store, id, &[good, bad]).await.is_err());
        assert!(get_transactions_for_statement(store.pool(), id)
            .await
            .unwrap()
            .is_empty());
        let s = get_statement(store.pool(), id).await.unwrap().unwrap();
        assert_eq!(s.status, StatementStatus::Processing);
        assert!(s.totals.is_none());
    }

    #[tokio::test]
    async fn failed_statement_receives_no_rows() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        assert!(fail_statement(store.pool(), id, "swept").await.unwrap());
        assert!(!persist(&store, id, &[tx(id, 1, Direction::Expense, 100)]).await.unwrap());
        assert!(get_transactions_for_statement(store.pool(), id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn complete_then_fail_is_ignored() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        let totals = StatementTotals::new(Money::from_cents(5000_00), Money::from_cents(120_50));
        assert!(persist_statement(store.pool(), id, &[], &totals, Utc::now()).await.unwrap());
        assert!(!fail_statement(store.pool(), id, "late error").await.unwrap());

        let s = get_statement(store.pool(), id).await.unwrap().unwrap();
        assert_eq!(s.status, StatementStatus::Completed);
        assert_eq!(s.totals, Some(totals));
        assert!(s.processed_at.is_some());
        assert!(s.error_message.is_none());
    }

    #[tokio::test]
    async fn failed_statement_is_never_completed() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        assert!(fail_statement(store.pool(), id, "download failed").await.unwrap());
        let totals = StatementTotals::new(Money::zero(), Money::zero());
        assert!(!persist_statement(store.pool(), id, &[], &totals, Utc::now()).await.unwrap());

        let s = get_statement(store.pool(), id).await.unwrap().unwrap();
        assert_eq!(s.status, StatementStatus::Failed);
        assert_eq!(s.error_message.as_deref(), Some("download failed"));
    }

    #[tokio::test]
    async fn stale_sweep_only_touches_old_processing_rows() {
        let (_dir, store) = test_store().await;
        let old = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        let done = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        let totals = StatementTotals::new(Money::zero(), Money::zero());
        persist_statement(store.pool(), done, &[], &totals, Utc::now()).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let swept = fail_stale_statements(store.pool(), cutoff, "timed out").await.unwrap();
        assert_eq!(swept, 1);
        let s = get_statement(store.pool(), old).await.unwrap().unwrap();
        assert_eq!(s.status, StatementStatus::Failed);
        let s = get_statement(store.pool(), done).await.unwrap().unwrap();
        assert_eq!(s.status, StatementStatus::Completed);
    }

    #[tokio::test]
    async fn owner_query_filters_by_date_range() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        persist(
            &store,
            id,
            &[
                tx(id, 1, Direction::Income, 100),
                tx(id, 15, Direction::Expense, 200),
                tx(id, 31, Direction::Expense, 300),
            ],
        )
        .await
        .unwrap();

        let all = get_transactions_for_owner(store.pool(), "u1", None).await.unwrap();
        assert_eq!(all.len(), 3);
        let mid = get_transactions_for_owner(
            store.pool(),
            "u1",
            Some(DateRange::new(date(2024, 3, 2), date(2024, 3, 15))),
        )
        .await
        .unwrap();
        assert_eq!(mid.len(), 1);
        assert_eq!(mid[0].data.original_amount, Money::from_cents(200));
        assert!(get_transactions_for_owner(store.pool(), "other", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn category_edit_and_cascading_delete() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        persist(&store, id, &[tx(id, 3, Direction::Expense, 100)])
            .await
            .unwrap();
        let t = &get_transactions_for_statement(store.pool(), id).await.unwrap()[0];
        assert!(update_transaction_category(store.pool(), t.id, "Groceries").await.unwrap());
        let t = &get_transactions_for_statement(store.pool(), id).await.unwrap()[0];
        assert_eq!(t.data.category, "Groceries");

        assert!(delete_statement(store.pool(), id).await.unwrap());
        assert!(get_transactions_for_owner(store.pool(), "u1", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn sums_by_direction() {
        let (_dir, store) = test_store().await;
        let id = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        persist(
            &store,
            id,
            &[
                tx(id, 1, Direction::Income, 5000_00),
                tx(id, 2, Direction::Expense, 120_50),
                tx(id, 3, Direction::Expense, 79_50),
            ],
        )
        .await
        .unwrap();
        let sums = store.statement_sums(id).await.unwrap();
        assert_eq!(sums.income, Money::from_cents(5000_00));
        assert_eq!(sums.expenses, Money::from_cents(200_00));
        assert_eq!(sums.net, Money::from_cents(4800_00));
    }

    #[tokio::test]
    async fn statements_listed_newest_first() {
        let (_dir, store) = test_store().await;
        let a = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        let b = insert_statement(store.pool(), &new_statement("u1")).await.unwrap();
        insert_statement(store.pool(), &new_statement("u2")).await.unwrap();
        let ids: Vec<_> = list_statements(store.pool(), "u1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![b, a]);
    }
}
