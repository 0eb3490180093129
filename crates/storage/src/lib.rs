pub mod db;
pub mod error;
pub mod objects;

pub use db::{
    create_db, delete_statement, fail_stale_statements, fail_statement,
    get_categories, get_statement, get_transactions_for_owner, get_transactions_for_statement,
    insert_statement, list_statements, persist_statement, seed_default_categories,
    update_transaction_category, DbPool, SqliteStore,
};
pub use error::StorageError;
pub use objects::ObjectStore;
