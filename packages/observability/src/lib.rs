//! # Observability
//!
//! Centralized `tracing` setup for the score relay services.
//!
//! Services call `observability::init()` (or `init_with_config`) once at
//! startup and use the standard `tracing` macros everywhere else. They do not
//! know where log lines end up.
//!
//! Two output shapes are supported:
//!
//! - **Compact**: human-readable lines on stderr, the default for local runs.
//! - **Json**: one JSON object per line with `timestamp`, `level`, `service`,
//!   `pid`, `target`, `message` and the structured fields, written to stderr
//!   or appended to a file when `log_path` is set.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "score-relay".into(),
//!     default_level: "debug".into(),
//!     format: observability::LogFormat::Json,
//!     ..Default::default()
//! });
//! ```
//!
//! `RUST_LOG` always wins over `default_level`.

mod json_layer;
mod writer;

use std::path::PathBuf;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::AppendWriter;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Compact,
    /// Structured JSON lines.
    Json,
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSON log line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Output format.
    pub format: LogFormat,

    /// Optional file that JSON lines are appended to instead of stderr.
    /// Ignored for the compact format.
    pub log_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
        }
    }
}

/// Initialize the observability layer with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Installing a second global subscriber is a no-op, so tests and embedded
/// callers may call this more than once.
pub fn init_with_config(config: LogConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    match config.format {
        LogFormat::Compact => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .try_init();
        }
        LogFormat::Json => {
            let file_writer = config
                .log_path
                .as_ref()
                .and_then(|path| match AppendWriter::open(path) {
                    Ok(writer) => Some(writer),
                    Err(e) => {
                        eprintln!("failed to open log file {}: {e}", path.display());
                        None
                    }
                });

            let result = match file_writer {
                Some(writer) => tracing_subscriber::registry()
                    .with(env_filter)
                    .with(JsonLayer::new(config.service_name.clone(), writer))
                    .try_init(),
                None => tracing_subscriber::registry()
                    .with(env_filter)
                    .with(JsonLayer::new(config.service_name.clone(), std::io::stderr))
                    .try_init(),
            };

            if result.is_ok() {
                tracing::debug!(service = %config.service_name, "observability initialized");
            }
        }
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
