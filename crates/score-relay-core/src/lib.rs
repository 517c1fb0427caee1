//! Core types, configuration, and shared primitives for the score relay.

mod config;
mod error;
mod logging;
mod paths;
pub mod ticker;
pub mod validator;

pub use config::{Config, DEFAULT_LOG_LEVEL, DEFAULT_TOPIC, EVENT_SCORE_UPDATE};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
pub use ticker::{spawn_periodic, PeriodicHandle, TickMode};
pub use validator::{is_valid_score_reading, RawScoreReading, ScoreReading, ValidationError};
