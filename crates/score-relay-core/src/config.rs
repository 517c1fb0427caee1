//! Relay configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, the JSON
//! config file, environment variables and finally CLI flags (applied by the
//! binary after [`Config::load`]).

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default message bus topic for score updates.
pub const DEFAULT_TOPIC: &str = "event-scores";

/// Event type recorded on every outbox row.
pub const EVENT_SCORE_UPDATE: &str = "EVENT_SCORE_UPDATE";

/// Main relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Emit JSON log lines instead of compact text.
    pub log_json: bool,
    /// Address the HTTP boundary listens on.
    pub http_bind: String,
    /// SQLite file; `None` means `<base_dir>/score-relay.db`.
    pub database_path: Option<PathBuf>,
    /// Base URL of the external score provider.
    pub provider_base_url: String,
    pub provider_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_initial_delay_ms: u64,
    pub reconcile_interval_ms: u64,
    /// Delivery attempts before a message becomes permanently failed.
    pub max_retries: u32,
    pub publish_timeout_ms: u64,
    /// How long a delivery claim stays valid before another worker may take it.
    pub claim_lease_ms: u64,
    /// Attempt delivery right after the outbox insert. When false, only the
    /// reconciliation sweep publishes.
    pub direct_delivery: bool,
    pub redis_url: String,
    pub topic: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            http_bind: "127.0.0.1:8080".to_string(),
            database_path: None,
            provider_base_url: "http://localhost:8081".to_string(),
            provider_timeout_ms: 5_000,
            poll_interval_ms: 10_000,
            poll_initial_delay_ms: 1_000,
            reconcile_interval_ms: 10_000,
            max_retries: 5,
            publish_timeout_ms: 5_000,
            claim_lease_ms: 30_000,
            direct_delivery: true,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `<base>/config.json` (if present), then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.with_env_overrides()
    }

    /// Load configuration from a specific file, then apply environment
    /// overrides.
    pub fn load_path(path: &Path) -> CoreResult<Self> {
        Self::load_from_file(path)?.with_env_overrides()
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn with_env_overrides(mut self) -> CoreResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SCORE_RELAY_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("SCORE_RELAY_LOG_JSON") {
            self.log_json = parse_env("SCORE_RELAY_LOG_JSON", &v)?;
        }
        if let Some(v) = lookup("SCORE_RELAY_HTTP_BIND") {
            self.http_bind = v;
        }
        if let Some(v) = lookup("SCORE_RELAY_DATABASE") {
            self.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SCORE_PROVIDER_URL") {
            self.provider_base_url = v;
        }
        if let Some(v) = lookup("SCORE_PROVIDER_TIMEOUT_MS") {
            self.provider_timeout_ms = parse_env("SCORE_PROVIDER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SCORE_RELAY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_env("SCORE_RELAY_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("SCORE_RELAY_POLL_DELAY_MS") {
            self.poll_initial_delay_ms = parse_env("SCORE_RELAY_POLL_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("SCORE_RELAY_RECONCILE_INTERVAL_MS") {
            self.reconcile_interval_ms = parse_env("SCORE_RELAY_RECONCILE_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("SCORE_RELAY_MAX_RETRIES") {
            self.max_retries = parse_env("SCORE_RELAY_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("SCORE_RELAY_PUBLISH_TIMEOUT_MS") {
            self.publish_timeout_ms = parse_env("SCORE_RELAY_PUBLISH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SCORE_RELAY_CLAIM_LEASE_MS") {
            self.claim_lease_ms = parse_env("SCORE_RELAY_CLAIM_LEASE_MS", &v)?;
        }
        if let Some(v) = lookup("SCORE_RELAY_DIRECT_DELIVERY") {
            self.direct_delivery = parse_env("SCORE_RELAY_DIRECT_DELIVERY", &v)?;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.redis_url = v;
        }
        if let Some(v) = lookup("SCORE_RELAY_TOPIC") {
            self.topic = v;
        }
        Ok(())
    }

    /// Reject values the services cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        let positive = [
            ("provider_timeout_ms", self.provider_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("reconcile_interval_ms", self.reconcile_interval_ms),
            ("publish_timeout_ms", self.publish_timeout_ms),
            ("claim_lease_ms", self.claim_lease_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::Config(format!("{name} must be greater than 0")));
            }
        }
        // A first failure must land in FAILED, never straight in
        // PERMANENTLY_FAILED.
        if self.max_retries < 2 {
            return Err(CoreError::Config("max_retries must be at least 2".to_string()));
        }
        // A claim must outlive the publish it protects.
        if self.claim_lease_ms <= self.publish_timeout_ms {
            return Err(CoreError::Config(
                "claim_lease_ms must be greater than publish_timeout_ms".to_string(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(CoreError::Config("topic must not be empty".to_string()));
        }
        self.provider_url()?;
        Ok(())
    }

    /// Resolve the database file against `paths` when no explicit path is set.
    pub fn database_file(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    /// Get the provider base URL as a parsed URL.
    pub fn provider_url(&self) -> CoreResult<Url> {
        Url::parse(&self.provider_base_url).map_err(CoreError::from)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_initial_delay(&self) -> Duration {
        Duration::from_millis(self.poll_initial_delay_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{key} has invalid value {value:?}")))
}
