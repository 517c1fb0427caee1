//! Registry error types.

use score_relay_database::DatabaseError;
use thiserror::Error;

/// Registry error type.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Event id must not be empty")]
    InvalidEventId,

    #[error("Event already exists: {0}")]
    AlreadyExists(String),

    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias using RegistryError.
pub type RegistryResult<T> = Result<T, RegistryError>;
