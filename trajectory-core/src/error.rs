//! Error types for trajectory-core

use thiserror::Error;

/// Main error type for the trajectory-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Caller violated the classification input contract
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// True when the error is the caller's fault rather than ours.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

/// Result type alias for trajectory-core
pub type Result<T> = std::result::Result<T, Error>;
