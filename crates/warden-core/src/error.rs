//! Core error types.

use std::time::Duration;

use thiserror::Error;

/// Error reported by a relational driver.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    /// Create a driver error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying driver failure.
    pub fn from_source(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Engine errors.
///
/// Everything up to and including SQL compilation fails before any statement
/// reaches the driver. Execution errors abort the whole request.
#[derive(Debug, Error)]
pub enum Error {
    /// A collection, field, or relation does not exist in the schema.
    #[error("schema resolution failed: {0}")]
    SchemaResolution(String),

    /// No permission record covers a requested field.
    #[error("forbidden: field '{field}' of collection '{collection}' is not readable")]
    ForbiddenField { collection: String, field: String },

    /// No permission record exists for the collection and action.
    #[error("permission denied: no {action} access to collection '{collection}'")]
    PermissionDenied { collection: String, action: String },

    /// Malformed filter, bad operand, or a function applied to the wrong type.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Malformed query parameters.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid aggregate or group-by request.
    #[error("invalid aggregate: {0}")]
    AggregateValidation(String),

    /// A statement failed in the driver.
    #[error("backend execution failed at '{path}': {source}")]
    BackendExecution {
        /// Tree path of the node whose statement failed.
        path: String,
        /// The statement text.
        sql: String,
        #[source]
        source: DriverError,
    },

    /// The request was cancelled by the caller.
    #[error("query cancelled")]
    Cancelled,

    /// The request exceeded its time budget.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The permission store failed.
    #[error("permission store error: {0}")]
    PermissionStore(String),
}

impl Error {
    /// Create a schema resolution error.
    pub fn schema(message: impl Into<String>) -> Self {
        Error::SchemaResolution(message.into())
    }

    /// Create a forbidden field error.
    pub fn forbidden(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Error::ForbiddenField {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Stable code for caller-facing layers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::SchemaResolution(_) => "INVALID_QUERY",
            Error::ForbiddenField { .. } | Error::PermissionDenied { .. } => "FORBIDDEN",
            Error::InvalidFilter(_) => "INVALID_FILTER",
            Error::InvalidQuery(_) => "INVALID_QUERY",
            Error::AggregateValidation(_) => "INVALID_AGGREGATE",
            Error::BackendExecution { .. } => "BACKEND_ERROR",
            Error::Cancelled => "REQUEST_CANCELLED",
            Error::Timeout(_) => "REQUEST_TIMEOUT",
            Error::PermissionStore(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Statement text of a backend failure.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::BackendExecution { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Tree path of a backend failure.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::BackendExecution { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl From<warden_proto::Error> for Error {
    fn from(err: warden_proto::Error) -> Self {
        match err {
            warden_proto::Error::InvalidQuery(message) => Error::InvalidQuery(message),
            other => Error::InvalidFilter(other.to_string()),
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::forbidden("articles", "secret").code(), "FORBIDDEN");
        assert_eq!(Error::schema("unknown field").code(), "INVALID_QUERY");
        assert_eq!(Error::Cancelled.code(), "REQUEST_CANCELLED");
    }

    #[test]
    fn test_backend_error_exposes_sql() {
        let err = Error::BackendExecution {
            path: "articles.comments".into(),
            sql: "SELECT 1".into(),
            source: DriverError::new("no such table"),
        };
        assert_eq!(err.sql(), Some("SELECT 1"));
        assert_eq!(err.path(), Some("articles.comments"));
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn test_model_errors_convert() {
        let err: Error = warden_proto::Error::UnknownOperator("_bogus".into()).into();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }
}
