//! Error types for the sync engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient storage error: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether retrying the same operation is expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
