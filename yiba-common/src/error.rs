//! Common error types for Yiba Verified

use thiserror::Error;

/// Common result type for Yiba Verified operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error taxonomy across the Yiba Verified services
///
/// Route handlers translate these to HTTP statuses at the boundary;
/// domain code returns `Result` rather than sentinel values.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No valid session or bypass credential presented
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Role or tenant check failed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller exceeded a request rate limit
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code used in JSON error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => {
                "internal_error"
            }
            Error::Unauthenticated(_) => "unauthenticated",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::RateLimited => "rate_limited",
        }
    }
}
