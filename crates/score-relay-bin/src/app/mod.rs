//! Application wiring and lifecycle.

mod init;

pub use init::run;
