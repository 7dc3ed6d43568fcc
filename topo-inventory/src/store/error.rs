//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database access failed.
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record to update was removed concurrently.
    #[error("record {0} no longer exists")]
    RecordGone(i64),

    /// An attribute name cannot be addressed inside the JSON column.
    #[error("invalid attribute name {0:?}")]
    InvalidAttribute(String),

    /// A row holds a value outside its column's domain.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
