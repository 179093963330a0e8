//! pulse-api library interface
//!
//! Exposes the application state and router assembly for integration
//! testing.

pub mod agent;
pub mod analytics;
pub mod api;
pub mod error;
pub mod middleware;
pub mod pagination;
pub mod session;

use agent::llm::{HttpLlmClient, LlmClient};
use agent::QaAgent;
use api::chat::ChatRecord;
use axum::http::HeaderValue;
use axum::Router;
use middleware::RateLimiter;
use pulse_common::cache::Cache;
use pulse_common::config::Settings;
use pulse_common::metrics::Metrics;
use pulse_common::queue::JobQueue;
use pulse_common::vector::{SqlVectorStore, VectorStore};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers. Adapters are constructed
/// once at startup and passed into every request scope through this
/// handle.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub cache: Cache,
    pub queue: JobQueue,
    pub vector: Arc<dyn VectorStore>,
    pub settings: Arc<Settings>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Metrics,
    pub agent: Option<Arc<QaAgent>>,
    pub chat_history: Arc<RwLock<Vec<ChatRecord>>>,
}

impl AppState {
    pub fn new(pool: SqlitePool, settings: Settings) -> Self {
        let vector: Arc<dyn VectorStore> = Arc::new(SqlVectorStore::new(pool.clone()));

        let llm: Option<Arc<dyn LlmClient>> = if settings.external.llm_url.is_empty() {
            None
        } else {
            Some(Arc::new(HttpLlmClient::new(
                settings.external.llm_url.clone(),
                settings.external.llm_api_key.clone(),
            )))
        };
        let agent = llm.map(|client| {
            Arc::new(QaAgent::new(client, pool.clone(), vector.clone()))
        });

        Self {
            queue: JobQueue::new(pool.clone()),
            cache: Cache::new(),
            limiter: Arc::new(RateLimiter::new(settings.rate_limit.clone())),
            metrics: Metrics::new(),
            agent,
            chat_history: Arc::new(RwLock::new(Vec::new())),
            settings: Arc::new(settings),
            vector,
            pool,
        }
    }

    /// Swap in a different language model client (tests use a scripted
    /// one).
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.agent = Some(Arc::new(QaAgent::new(
            llm,
            self.pool.clone(),
            self.vector.clone(),
        )));
        self
    }
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.settings.cors.allowed_origins;
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the application router with the full middleware chain.
pub fn build_router(state: AppState) -> Router {
    // `/analytics/*` is canonical; the same handlers also answer under
    // `/api` together with the feedback detail and export endpoints.
    let api_alias = api::analytics::routes()
        .merge(api::feedback::routes())
        .merge(api::export::routes());

    Router::new()
        .nest("/ingest", api::ingest::routes())
        .nest("/analytics", api::analytics::routes())
        .nest("/chat", api::chat::routes())
        .nest("/admin", api::admin::routes())
        .nest("/api", api_alias)
        .merge(api::health::routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(cors_layer(&state))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_tracing,
        ))
        .with_state(state)
}
