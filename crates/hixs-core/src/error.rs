//! Error types for Hixs core

use hixs_types::JobId;
use thiserror::Error;

/// Errors that can occur in Hixs core
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid blocklist pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download not found: {0}")]
    NotFound(JobId),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server error: HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Too many redirects (limit {limit})")]
    TooManyRedirects { limit: u32 },

    #[error("Timed out after {secs}s without data")]
    ReadTimeout { secs: u64 },

    #[error("Redirect response without a usable Location header")]
    MissingRedirectTarget,

    #[error("Download was cancelled")]
    Cancelled,

    #[error("No async runtime available")]
    NoRuntime,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Errors that should stop the process from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::InvalidPattern { .. } | CoreError::Config(_))
    }
}

impl From<CoreError> for String {
    fn from(error: CoreError) -> Self {
        error.to_string()
    }
}
