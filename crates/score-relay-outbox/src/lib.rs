//! Outbox pattern implementation for reliable score delivery.
//!
//! This crate provides:
//! - `MessageBus`: the publish seam, with `RedisStreamBus` as the production bus
//! - `OutboxSender`: one bounded publish attempt
//! - `OutboxEngine`: persist, attempt, record; plus the reconciliation sweep
//!   that replays PENDING and FAILED messages until they are sent or run out
//!   of retries
//!
//! Delivery is at-least-once. Every attempt is preceded by a claim on the row
//! so the direct path and a concurrent sweep never publish the same message
//! at the same time.

mod bus;
mod engine;
mod error;
mod sender;
pub mod state;

pub use bus::{MessageBus, RedisStreamBus};
pub use engine::{EnqueueOutcome, OutboxConfig, OutboxEngine, ReconcileReport};
pub use error::{OutboxError, OutboxResult};
pub use sender::OutboxSender;
