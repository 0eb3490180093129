use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt {column} value in database: {value:?}")]
    Corrupt { column: &'static str, value: String },
    #[error("Amount {0} does not fit in the cents column")]
    AmountOutOfRange(String),
    #[error("Object location {0:?} is outside the store")]
    InvalidLocation(String),
}
