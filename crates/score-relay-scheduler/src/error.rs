//! Score provider error types.

use thiserror::Error;

/// Why a score poll produced no reading.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport error, including the client timeout
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("Provider returned status {0}")]
    Status(u16),

    /// Body is not a score reading
    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    /// Base URL cannot be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Result type alias using ProviderError.
pub type ProviderResult<T> = Result<T, ProviderError>;
