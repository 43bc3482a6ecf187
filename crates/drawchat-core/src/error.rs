//! Error types for drawchat-core

use thiserror::Error;

/// Result type alias using drawchat-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in drawchat-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Conversation not found
    #[error("Conversation not found: {0}")]
    NotFound(String),

    /// Payload was evicted from the local cache and must be fetched again
    #[error("Conversation {0} is not cached locally; waiting for sync to restore it")]
    Evicted(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local storage rejected a write because its byte quota is exhausted
    #[error("Storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    /// A message has no associated diagram snapshot
    #[error("No saved snapshot for message {0}")]
    NoSnapshot(usize),

    /// Remote store error
    #[error("Remote error: {0}")]
    Remote(String),
}

impl Error {
    /// Whether this error came from the local storage quota.
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}
