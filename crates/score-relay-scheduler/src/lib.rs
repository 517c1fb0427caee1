//! Per-event score polling.
//!
//! [`JobScheduler`] keeps at most one recurring poll job per event id. Every
//! tick asks the [`ScoreProvider`] for the event's score, validates it and
//! hands valid readings to the [`ScoreSink`] (the outbox engine in
//! production). Failures inside a tick are logged and never escape it.

mod error;
mod provider;
mod scheduler;
mod sink;

pub use error::{ProviderError, ProviderResult};
pub use provider::{HttpScoreProvider, ScoreProvider};
pub use scheduler::{JobScheduler, SchedulerConfig};
pub use sink::ScoreSink;
