//! Outbox error types.

use score_relay_database::OutboxStatus;
use std::time::Duration;
use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] score_relay_database::DatabaseError),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Broker rejected or failed the publish
    #[error("Publish failed: {0}")]
    Publish(String),

    /// No broker acknowledgement within the bounded wait
    #[error("Publish timed out after {0:?}")]
    PublishTimeout(Duration),

    /// A status change the state machine does not allow
    #[error("Invalid outbox transition {from} -> {to}")]
    InvalidTransition {
        from: OutboxStatus,
        to: OutboxStatus,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
