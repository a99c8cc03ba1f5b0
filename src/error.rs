//! Error types shared by the query layer and the backend client.
//!
//! The fetch cache and the search engine never fail, so everything that can
//! go wrong lives here: failed reads, rejected writes, and fetches that were
//! superseded before they finished.

use thiserror::Error;

/// Errors produced by fetchers, mutations and the HTTP collaborator.
///
/// The type is `Clone` because a single in-flight fetch hands the same
/// outcome to every caller that joined it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Network failure, timeout or a 5xx answer. Retried by reads.
    #[error("Transient fetch error: {0}")]
    Transient(String),

    /// The request was malformed and will not succeed if repeated.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend does not know the requested resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The fetch was superseded or its consumer went away.
    #[error("Request cancelled")]
    Cancelled,

    /// A cache slot holds a value of a different type than the one requested.
    #[error("Cached value for {0} has an unexpected type")]
    TypeMismatch(String),
}

impl QueryError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            QueryError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            if status.is_server_error() {
                QueryError::Transient(err.to_string())
            } else {
                QueryError::Validation(err.to_string())
            }
        } else {
            // Connect errors, timeouts and broken bodies
            QueryError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Decode(err.to_string())
    }
}

/// Result alias used throughout the query layer.
pub type Result<T> = std::result::Result<T, QueryError>;
