//! pulse-api - feedback service HTTP server
//!
//! Serves ingestion, analytics, export, admin, and the grounded QA
//! facade over the shared store. Enrichment runs in the separate
//! pulse-worker process.

use anyhow::Result;
use pulse_api::{build_router, AppState};
use pulse_common::config::Settings;
use pulse_common::db;
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

    info!("Starting pulse-api");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let pool = db::connect_pool(&settings.database).await?;
    db::init_schema(&pool).await?;
    info!("Database connection established");

    let bind_addr = format!("{}:{}", settings.host, settings.port);
    let state = AppState::new(pool, settings);
    if state.agent.is_none() {
        info!("No LLM endpoint configured; /chat/query will answer 503");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{bind_addr}");
    info!("Health check: http://{bind_addr}/health");

    axum::serve(listener, app).await?;

    Ok(())
}
