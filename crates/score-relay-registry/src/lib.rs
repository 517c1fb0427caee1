//! Event registry for the score relay.
//!
//! [`EventRegistry`] owns the event status store and keeps the job scheduler
//! in step with it: a LIVE event has exactly one poll job, a NOT_LIVE event
//! has none. [`http::router`] exposes it over a thin JSON API.

mod error;
pub mod http;
mod registry;

pub use error::{RegistryError, RegistryResult};
pub use http::{router, AppState};
pub use registry::EventRegistry;
