//! Common error types for Lectio.

use thiserror::Error;

/// Top-level error type for Lectio operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A translation could not be fetched or parsed.
    #[error("Failed to load translation '{translation}': {reason}")]
    LoadFailed { translation: String, reason: String },

    /// Chapter data requested before the translation was loaded.
    #[error("Translation not loaded: {0}")]
    NotLoaded(String),

    /// Search options are structurally invalid.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Delivering an outbox entry to the remote endpoint failed.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Key/value store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network request failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Build a `LoadFailed` error for a translation.
    pub fn load_failed(translation: impl Into<String>, reason: impl ToString) -> Self {
        Self::LoadFailed {
            translation: translation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
