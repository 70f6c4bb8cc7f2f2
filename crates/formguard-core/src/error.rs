//! Security error types.

use thiserror::Error;

/// Security-related errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("rate limited: {identifier}, retry after {retry_after:?}")]
    RateLimited {
        identifier: String,
        retry_after: std::time::Duration,
    },

    #[error("CSRF token missing")]
    CsrfMissing,

    #[error("CSRF token mismatch")]
    CsrfMismatch,

    #[error("random source unavailable: {0}")]
    RandomSource(String),

    #[error("event report failed: {0}")]
    ReportFailed(String),

    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    #[error("consent store error: {0}")]
    ConsentStore(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
