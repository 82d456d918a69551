//! Errors raised while reading queries, filters, and permission records.

use thiserror::Error;

/// Errors for malformed query model input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A filter object could not be interpreted.
    #[error("invalid filter at '{path}': {message}")]
    InvalidFilter { path: String, message: String },

    /// An operator key is not recognized.
    #[error("unknown filter operator '{0}'")]
    UnknownOperator(String),

    /// A query parameter is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Deserialization from JSON failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Create an invalid filter error for the given path.
    pub fn invalid_filter(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

/// Result alias for model operations.
pub type Result<T> = std::result::Result<T, Error>;
