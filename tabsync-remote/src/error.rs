//! Error types for the remote document store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur talking to the remote document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The credential was rejected (401, or 403 without a rate-limit cause).
    #[error("remote store rejected the credential")]
    TokenInvalid,

    /// No credential has been configured on this store yet.
    #[error("no credential configured")]
    NoToken,

    /// The requested document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The store is throttling us.
    #[error("rate limited by the remote store")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Transport-level failure (DNS, TLS, connection reset, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The store answered with an unexpected status.
    #[error("remote store error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the shape we expect.
    #[error("failed to parse remote response: {0}")]
    Parse(String),
}

impl StoreError {
    /// Whether this error is a rate-limit response.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Suggested wait before retrying, when the store provided one.
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}
