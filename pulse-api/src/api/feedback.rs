//! Feedback detail endpoint

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use pulse_common::db::{annotations, feedback};
use serde_json::json;
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new().route("/feedback/:id", get(get_feedback))
}

/// One feedback joined with its live annotation.
async fn get_feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::validation("Invalid feedback id format"))?;

    let row = feedback::load_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Feedback {id} not found")))?;
    let annotation = annotations::load_for_feedback(&state.pool, id).await?;

    Ok(Json(json!({
        "id": row.id.to_string(),
        "source": row.source,
        "customer_id": row.customer_id,
        "text": row.text,
        "normalized_text": row.normalized_text,
        "detected_language": row.detected_language,
        "meta": row.meta,
        "created_at": row.created_at.to_rfc3339(),
        "updated_at": row.updated_at.to_rfc3339(),
        "annotation": annotation.map(|a| json!({
            "sentiment": a.sentiment,
            "sentiment_score": a.sentiment_score,
            "topic_id": a.topic_id,
            "toxicity_score": a.toxicity_score,
            "model_version": a.model_version,
        })),
    })))
}
