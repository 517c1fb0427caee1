//! Service startup and graceful shutdown.

use score_relay_core::{Config, Paths};
use score_relay_database::AsyncDatabase;
use score_relay_outbox::{OutboxConfig, OutboxEngine, RedisStreamBus};
use score_relay_registry::{router, AppState, EventRegistry};
use score_relay_scheduler::{HttpScoreProvider, JobScheduler, SchedulerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Run the relay until Ctrl-C.
pub async fn run(config: Config, paths: Paths) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        provider_url = %config.provider_base_url,
        redis_url = %config.redis_url,
        topic = %config.topic,
        poll_interval_ms = config.poll_interval_ms,
        reconcile_interval_ms = config.reconcile_interval_ms,
        max_retries = config.max_retries,
        direct_delivery = config.direct_delivery,
        "Starting score relay"
    );

    paths.ensure_dirs()?;
    let db = AsyncDatabase::open(&config.database_file(&paths)).await?;
    db.health_check().await?;

    // The bus connects lazily, so a broker that is down at startup only
    // shows up as failed deliveries.
    let bus = Arc::new(RedisStreamBus::new(&config.redis_url)?);
    let engine = Arc::new(OutboxEngine::new(
        db.clone(),
        bus,
        OutboxConfig::from(&config),
    ));
    let reconciler = engine.start_reconciler();

    let provider = Arc::new(HttpScoreProvider::new(
        &config.provider_base_url,
        config.provider_timeout(),
    )?);
    let scheduler = Arc::new(JobScheduler::new(
        provider,
        engine.clone(),
        SchedulerConfig::from(&config),
    ));

    let registry = Arc::new(EventRegistry::new(db.clone(), scheduler.clone()));
    registry.resume_live_jobs().await?;

    let app = router(AppState {
        registry,
        engine: engine.clone(),
    });
    let listener = TcpListener::bind(&config.http_bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server exited with error");
    }

    scheduler.shutdown();
    reconciler.cancel();
    db.close().await?;
    info!("Score relay stopped");

    served.map_err(Into::into)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
