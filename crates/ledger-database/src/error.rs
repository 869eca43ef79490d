//! Database error types.
//!
//! Callers match on [`DatabaseError`] to tell bad input apart from storage
//! failures and sync conflicts.

use thiserror::Error;

/// A rejected field. Raised before any I/O and never wraps a lower-level error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Storage failure.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Connection acquisition or pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// DDL or migration error
    #[error("Schema error: {0}")]
    Schema(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No row matched
    #[error("Not found: {0}")]
    NotFound(String),

    /// Field encryption error
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Short tag naming the failure kind.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Schema(_) => "schema",
            Self::Sqlite(_) => "transaction",
            Self::NotFound(_) => "not found",
            Self::Encryption(_) => "encryption",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

/// Local and remote copies of a record disagree and the remote copy won.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Sync conflict on record {record}: {reason}")]
pub struct SyncConflictError {
    pub record: String,
    pub reason: String,
}

/// Database error type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Conflict surfaced during sync
    #[error(transparent)]
    SyncConflict(#[from] SyncConflictError),
}

impl DatabaseError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(field, message))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Persistence(PersistenceError::NotFound(what.into()))
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Persistence(PersistenceError::Connection(message.into()))
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Persistence(PersistenceError::Schema(message.into()))
    }

    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Persistence(PersistenceError::Encryption(message.into()))
    }

    /// Message suitable for showing to the person who submitted the data.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.message.clone(),
            Self::Persistence(_) => "Could not save, will retry when online".to_string(),
            Self::SyncConflict(_) => "A newer copy of this session already exists".to_string(),
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::SyncConflict(_) => false,
            Self::Persistence(e) => matches!(
                e,
                PersistenceError::Connection(_) | PersistenceError::Sqlite(_) | PersistenceError::Io(_)
            ),
        }
    }

    /// Tag of the underlying persistence failure, if any.
    pub fn persistence_tag(&self) -> Option<&'static str> {
        match self {
            Self::Persistence(e) => Some(e.tag()),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(PersistenceError::Sqlite(e))
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(PersistenceError::Io(e))
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(PersistenceError::Json(e))
    }
}

impl From<r2d2::Error> for DatabaseError {
    fn from(e: r2d2::Error) -> Self {
        Self::Persistence(PersistenceError::Connection(e.to_string()))
    }
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
