//! SQLite persistence for the score relay.
//!
//! This crate provides:
//! - `AsyncDatabase`, an async SQLite executor running on a dedicated thread
//! - Versioned schema migrations
//! - Model types for the `events` and `message_outbox` tables
//! - Query functions, including the status-guarded outbox updates
//!
//! # Example
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let live = db.call(|conn| queries::list_events_with_status(conn, EventStatus::Live)).await?;
//! ```
//!
//! Only SQL runs inside `db.call()`. Network calls and waiting happen
//! outside so the executor thread never stalls.
//!
//! # Outbox guards
//!
//! Every outbox update after the insert is one `UPDATE ... WHERE` whose
//! affected-row count reports whether the caller won. A worker first claims a
//! row (`claim_message`), then finalises it with the same claim token
//! (`mark_message_sent` / `mark_message_failed`).

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
