//! Logging bootstrap.

use observability::{LogConfig, LogFormat};
use std::path::PathBuf;

/// Service name stamped on every JSON log line.
const SERVICE_NAME: &str = "score-relay";

/// Initialize logging for the relay.
///
/// `level` is the default filter (`RUST_LOG` overrides it). `json` switches
/// output from compact text on stderr to JSON lines, appended to `log_file`
/// when given and written to stderr otherwise. Calling this more than once
/// keeps the first subscriber.
pub fn init_logging(level: &str, json: bool, log_file: Option<PathBuf>) {
    observability::init_with_config(log_config(level, json, log_file));
}

fn log_config(level: &str, json: bool, log_file: Option<PathBuf>) -> LogConfig {
    LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        format: if json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
        log_path: if json { log_file } else { None },
    }
}
