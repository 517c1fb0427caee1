//! Score relay: polls live events and republishes their scores.

mod app;

use clap::Parser;
use score_relay_core::{init_logging, Config, Paths};
use std::path::PathBuf;

/// Score relay command-line interface.
#[derive(Parser, Debug)]
#[command(name = "score-relay")]
#[command(about = "Polls live event scores and relays them to the message bus")]
#[command(version)]
struct Cli {
    /// Config file (defaults to <base-dir>/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base directory for config and database. Defaults to ~/.score-relay
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Address the HTTP API listens on
    #[arg(long)]
    bind: Option<String>,

    /// Score provider base URL
    #[arg(long)]
    provider_url: Option<String>,

    /// Redis connection URL
    #[arg(long)]
    redis_url: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(bind) = &self.bind {
            config.http_bind = bind.clone();
        }
        if let Some(url) = &self.provider_url {
            config.provider_base_url = url.clone();
        }
        if let Some(url) = &self.redis_url {
            config.redis_url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match &cli.base_dir {
        Some(base) => Paths::with_base_dir(base.clone()),
        None => Paths::new()?,
    };
    let mut config = match &cli.config {
        Some(path) => Config::load_path(path)?,
        None => Config::load(&paths)?,
    };
    cli.apply(&mut config);

    // The level itself is configurable, so logging starts once config is read.
    init_logging(
        &config.log_level,
        config.log_json,
        Some(paths.log_file()),
    );
    config.validate()?;

    app::run(config, paths).await
}
