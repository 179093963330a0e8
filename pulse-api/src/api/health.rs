//! Health and metrics endpoints

use crate::error::ApiResult;
use crate::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Prometheus text exposition. Development only; disabled outside debug
/// deployments.
async fn metrics(State(state): State<AppState>) -> ApiResult<String> {
    if !state.settings.debug {
        return Err(crate::error::ApiError::not_found("Not available"));
    }
    Ok(state.metrics.render().await)
}
