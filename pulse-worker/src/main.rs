//! pulse-worker - enrichment worker process
//!
//! Consumes the ingest/annotate/cluster/reports queues and runs the
//! four-stage enrichment pipeline against the shared store.

use anyhow::Result;
use pulse_common::cache::Cache;
use pulse_common::config::Settings;
use pulse_common::db;
use pulse_worker::runner;
use pulse_worker::WorkerContext;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (&settings.log.file, settings.log.json) {
        (Some(path), json) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let writer = std::sync::Mutex::new(file);
            if json {
                builder.with_writer(writer).json().init();
            } else {
                builder.with_writer(writer).init();
            }
        }
        (None, true) => builder.json().init(),
        (None, false) => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env();
    init_tracing(&settings)?;

    info!("Starting pulse-worker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let pool = db::connect_pool(&settings.database).await?;
    db::init_schema(&pool).await?;
    info!("Database connection established");

    let cache = Cache::new();
    let ctx = WorkerContext::new(pool, cache, &settings);
    info!(
        sentiment_model = ctx.sentiment.version(),
        english_only = ctx.english_only,
        "Worker context ready"
    );

    let cancel = CancellationToken::new();
    let handles = runner::spawn_consumers(&ctx, &cancel);
    info!(consumers = handles.len(), "Consumer pools running");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining consumers");
    cancel.cancel();

    for handle in handles {
        let _ = handle.await;
    }
    info!("pulse-worker stopped");

    Ok(())
}
