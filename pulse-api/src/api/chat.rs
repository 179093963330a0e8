//! Conversational QA endpoints

use crate::agent::{QaOutcome, QueryFilters};
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use pulse_common::db::{feedback, topics};
use pulse_common::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

/// Wall-clock budget for one QA request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Question length ceiling in characters.
const MAX_QUESTION_LENGTH: usize = 1000;

/// Estimated-token ceiling for the combined prompt.
const MAX_TOKENS: usize = 4000;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/query", post(chat_query))
        .route("/conversations", get(conversations))
        .route("/clear-memory", post(clear_memory))
        .route("/suggestions", get(suggestions))
}

/// Rough token estimate: ~4 characters per token.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

#[derive(Debug, Deserialize)]
struct ChatQueryRequest {
    question: String,
    filters: Option<QueryFilters>,
}

/// One remembered exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRecord {
    pub question: String,
    pub answer: String,
    pub citation_count: usize,
    pub asked_at: String,
}

fn validate_limits(question: &str, filters: &QueryFilters) -> ApiResult<()> {
    if question.trim().is_empty() {
        return Err(ApiError::validation("Question must not be empty"));
    }
    if question.len() > MAX_QUESTION_LENGTH {
        return Err(ApiError(Error::TooLarge(format!(
            "Question of {} characters exceeds the {MAX_QUESTION_LENGTH} limit",
            question.len()
        ))));
    }

    let filter_text = filters.describe().unwrap_or_default();
    let total = estimate_tokens(question) + estimate_tokens(&filter_text);
    if total > MAX_TOKENS {
        return Err(ApiError(Error::TooLarge(format!(
            "Estimated {total} tokens exceeds the {MAX_TOKENS} limit"
        ))));
    }
    Ok(())
}

async fn chat_query(
    State(state): State<AppState>,
    Json(request): Json<ChatQueryRequest>,
) -> ApiResult<Json<QaOutcome>> {
    let filters = request.filters.unwrap_or_default();
    validate_limits(&request.question, &filters)?;

    let Some(agent) = &state.agent else {
        return Err(ApiError(Error::Unavailable(
            "No language model endpoint configured".into(),
        )));
    };

    info!(
        question = %request.question.chars().take(100).collect::<String>(),
        "Processing QA query"
    );

    let outcome = tokio::time::timeout(REQUEST_TIMEOUT, agent.answer(&request.question, &filters))
        .await
        .map_err(|_| {
            ApiError(Error::Timeout(format!(
                "Request timed out after {}s",
                REQUEST_TIMEOUT.as_secs()
            )))
        })??;

    {
        let mut history = state.chat_history.write().await;
        history.push(ChatRecord {
            question: request.question,
            answer: outcome.answer.clone(),
            citation_count: outcome.citations.len(),
            asked_at: Utc::now().to_rfc3339(),
        });
    }

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ConversationParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn conversations(
    State(state): State<AppState>,
    Query(params): Query<ConversationParams>,
) -> Json<Value> {
    let limit = params.limit.unwrap_or(50).min(200);
    let offset = params.offset.unwrap_or(0);

    let history = state.chat_history.read().await;
    let total = history.len();

    // Offset counts back from the most recent exchange
    let end = total.saturating_sub(offset);
    let start = end.saturating_sub(limit);
    let page: Vec<ChatRecord> = history[start..end].to_vec();

    Json(json!({
        "conversations": page,
        "total": total,
        "has_more": start > 0,
    }))
}

async fn clear_memory(State(state): State<AppState>) -> Json<Value> {
    let mut history = state.chat_history.write().await;
    let cleared = history.len();
    history.clear();
    info!(cleared, "Conversation memory cleared");
    Json(json!({ "message": "Conversation memory cleared successfully" }))
}

const BASE_SUGGESTIONS: &[&str] = &[
    "What are the main topics in customer feedback?",
    "How has sentiment changed over time?",
    "What are the most common customer complaints?",
    "Which sources provide the most feedback?",
    "Show me examples of negative feedback",
    "What topics have the most negative sentiment?",
    "Generate a weekly summary report",
];

async fn suggestions(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    const CACHE_KEY: &str = "suggestions:default";

    if let Some(cached) = state.cache.get(CACHE_KEY).await {
        if let Ok(value) = serde_json::from_slice::<Value>(&cached) {
            return Ok(Json(value));
        }
    }

    let total = feedback::count(&state.pool).await.unwrap_or(0);
    let topic_labels: Vec<String> = topics::list_all(&state.pool)
        .await
        .unwrap_or_default()
        .into_iter()
        .take(3)
        .map(|t| t.label)
        .collect();

    let mut suggestions: Vec<String> = BASE_SUGGESTIONS.iter().map(|s| s.to_string()).collect();
    if total > 100 {
        suggestions.insert(0, "Show me recent feedback trends".to_string());
    }

    let body = json!({
        "suggestions": suggestions,
        "context": {
            "total_feedback": total,
            "top_topics": topic_labels,
        },
    });

    state
        .cache
        .set_ttl(
            CACHE_KEY,
            serde_json::to_vec(&body).unwrap_or_default(),
            Duration::from_secs(300),
        )
        .await;

    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_reject_long_question() {
        let question = "x".repeat(MAX_QUESTION_LENGTH + 1);
        assert!(validate_limits(&question, &QueryFilters::default()).is_err());
    }

    #[test]
    fn test_limits_reject_empty_question() {
        assert!(validate_limits("  ", &QueryFilters::default()).is_err());
    }

    #[test]
    fn test_limits_accept_normal_question() {
        assert!(validate_limits(
            "What do customers say about checkout?",
            &QueryFilters::default()
        )
        .is_ok());
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
