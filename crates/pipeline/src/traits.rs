use chrono::{DateTime, Utc};
use kesef_core::{NewTransaction, Statement, StatementId, StatementTotals};
use kesef_storage::{db, ObjectStore, SqliteStore, StorageError};
use std::future::Future;

/// Where raw uploaded files are read back from.
pub trait FileStore: Send + Sync {
    fn fetch(&self, location: &str) -> impl Future<Output = Result<Vec<u8>, StorageError>> + Send;
}

/// The statement and transaction writes the orchestrator depends on.
pub trait StatementStore: Send + Sync {
    fn get_statement(
        &self,
        id: StatementId,
    ) -> impl Future<Output = Result<Option<Statement>, StorageError>> + Send;

    /// Store the rows and mark the statement completed as one unit: all of it
    /// or none. `Ok(false)` when the statement had already failed, in which
    /// case no rows are kept.
    fn persist_statement(
        &self,
        id: StatementId,
        transactions: &[NewTransaction],
        totals: &StatementTotals,
        processed_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// `Ok(false)` when the statement was no longer processing.
    fn fail_statement(
        &self,
        id: StatementId,
        message: &str,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;
}

impl FileStore for ObjectStore {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        ObjectStore::fetch(self, location).await
    }
}

impl StatementStore for SqliteStore {
    async fn get_statement(&self, id: StatementId) -> Result<Option<Statement>, StorageError> {
        db::get_statement(self.pool(), id).await
    }

    async fn persist_statement(
        &self,
        id: StatementId,
        transactions: &[NewTransaction],
        totals: &StatementTotals,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        db::persist_statement(self.pool(), id, transactions, totals, processed_at).await
    }

    async fn fail_statement(&self, id: StatementId, message: &str) -> Result<bool, StorageError> {
        db::fail_statement(self.pool(), id, message).await
    }
}
