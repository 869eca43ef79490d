//! Offline sync error types.

use thiserror::Error;

/// Offline sync error type.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] ledger_database::DatabaseError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ledger_config_and_utils::CoreError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Buffer document could not be read or written
    #[error("Buffer error: {0}")]
    Buffer(String),

    /// Malformed buffer key
    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;
