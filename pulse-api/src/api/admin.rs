//! Admin endpoints: login, stats, maintenance, and the audited mutations
//!
//! Read endpoints accept any valid bearer session; mutations demand the
//! admin role. Both mutation paths run one transaction spanning the write
//! and its audit entries, then invalidate the analytics cache and refresh
//! the rollup table after commit.

use crate::error::{ApiError, ApiResult};
use crate::session::{AdminSession, AuthSession};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use pulse_common::auth::{constant_time_eq, sign_token, Claims, Role};
use pulse_common::db::{aggregates, annotations, feedback, topics};
use pulse_common::models::AuditEntry;
use pulse_common::Error;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Wall-clock budget for one admin mutation.
const MUTATION_TIMEOUT: Duration = Duration::from_secs(10);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(admin_login))
        .route("/viewer/login", post(viewer_login))
        .route("/stats", get(stats))
        .route("/config", get(config_info))
        .route("/health/database", get(database_health))
        .route("/maintenance/refresh-materialized-view", post(refresh_view))
        .route("/topics", get(list_topics))
        .route("/topics/:id/feedback", get(topic_feedback))
        .route("/topic-audit", get(recent_audit))
        .route("/topic-audit/:topic_id", get(topic_audit))
        .route("/relabel-topic", post(relabel_topic))
        .route("/reassign-feedback", post(reassign_feedback))
        .route("/cleanup/old-data", post(cleanup_old_data))
        .route("/cache/clear", post(clear_cache))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

fn issue_token(state: &AppState, username: &str, role: Role) -> ApiResult<Json<Value>> {
    let claims = Claims::new(username, role, state.settings.security.token_expire_minutes);
    let token = sign_token(&claims, &state.settings.security.secret_key)?;
    Ok(Json(json!({
        "access_token": token,
        "token_type": "bearer",
        "role": role.as_str(),
        "expires_at": claims.exp,
    })))
}

async fn admin_login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let security = &state.settings.security;
    let user_ok = constant_time_eq(&request.username, &security.admin_username);
    let pass_ok = constant_time_eq(&request.password, &security.admin_password);
    if !(user_ok && pass_ok) {
        return Err(ApiError(Error::AuthMissing("Invalid credentials".into())));
    }
    info!(username = %request.username, "Admin login");
    issue_token(&state, &request.username, Role::Admin)
}

async fn viewer_login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let security = &state.settings.security;
    let user_ok = constant_time_eq(&request.username, &security.viewer_username);
    let pass_ok = constant_time_eq(&request.password, &security.viewer_password);
    if !(user_ok && pass_ok) {
        return Err(ApiError(Error::AuthMissing("Invalid credentials".into())));
    }
    info!(username = %request.username, "Viewer login");
    issue_token(&state, &request.username, Role::Viewer)
}

async fn stats(State(state): State<AppState>, _session: AuthSession) -> ApiResult<Json<Value>> {
    let total_feedback = feedback::count(&state.pool).await?;
    let recent_24h = feedback::count_recent_24h(&state.pool).await?;
    let total_annotations = annotations::count(&state.pool).await?;
    let total_topics = topics::count(&state.pool).await?;
    let queues = state.queue.stats().await?;

    let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
        .fetch_one(&state.pool)
        .await
        .map_err(Error::from)?;
    let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
        .fetch_one(&state.pool)
        .await
        .map_err(Error::from)?;

    Ok(Json(json!({
        "database": {
            "size_bytes": page_count * page_size,
        },
        "feedback": {
            "total": total_feedback,
            "recent_24h": recent_24h,
        },
        "annotations": { "total": total_annotations },
        "topics": { "total": total_topics },
        "queues": queues,
        "cache": { "live_entries": state.cache.live_len().await },
    })))
}

async fn config_info(State(state): State<AppState>, _session: AuthSession) -> Json<Value> {
    Json(state.settings.sanitized())
}

async fn database_health(State(state): State<AppState>) -> Json<Value> {
    match feedback::count(&state.pool).await {
        Ok(count) => Json(json!({
            "status": "healthy",
            "database_connection": "ok",
            "feedback_count": count,
        })),
        Err(e) => Json(json!({
            "status": "unhealthy",
            "database_connection": "failed",
            "error": e.to_string(),
        })),
    }
}

async fn refresh_view(
    State(state): State<AppState>,
    _session: AdminSession,
) -> ApiResult<Json<Value>> {
    aggregates::refresh(&state.pool).await?;
    Ok(Json(json!({
        "message": "Materialized view refreshed successfully",
        "view_name": "daily_feedback_aggregates",
    })))
}

async fn list_topics(State(state): State<AppState>, _session: AuthSession) -> ApiResult<Json<Value>> {
    let rows = sqlx::query(
        r#"
        SELECT
            t.id, t.label, t.keywords, t.created_at, t.updated_at,
            COUNT(na.feedback_id) AS feedback_count,
            AVG(na.sentiment_score) AS avg_sentiment
        FROM topic t
        LEFT JOIN nlp_annotation na ON t.id = na.topic_id
        GROUP BY t.id
        ORDER BY feedback_count DESC, t.id
        "#,
    )
    .fetch_all(&state.pool)
    .await
    .map_err(Error::from)?;

    let topics: Vec<Value> = rows
        .iter()
        .map(|row| {
            let keywords: Vec<String> = row
                .get::<Option<String>, _>("keywords")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default();
            json!({
                "id": row.get::<i64, _>("id"),
                "label": row.get::<String, _>("label"),
                "keywords": keywords,
                "created_at": row.get::<String, _>("created_at"),
                "updated_at": row.get::<String, _>("updated_at"),
                "feedback_count": row.get::<i64, _>("feedback_count"),
                "avg_sentiment": row.get::<Option<f64>, _>("avg_sentiment"),
            })
        })
        .collect();

    Ok(Json(json!({ "topics": topics })))
}

#[derive(Debug, Deserialize)]
struct TopicFeedbackParams {
    page: Option<i64>,
    page_size: Option<i64>,
}

async fn topic_feedback(
    State(state): State<AppState>,
    _session: AuthSession,
    Path(topic_id): Path<i64>,
    Query(params): Query<TopicFeedbackParams>,
) -> ApiResult<Json<Value>> {
    if topics::get_by_id(&state.pool, topic_id).await?.is_none() {
        return Err(ApiError::not_found(format!("Topic {topic_id} not found")));
    }

    let paging = crate::pagination::sanitize(params.page, params.page_size, 20, 100);

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM nlp_annotation WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_one(&state.pool)
            .await
            .map_err(Error::from)?;

    let rows = sqlx::query(
        r#"
        SELECT f.id, f.text, f.source, f.customer_id, f.created_at,
               na.sentiment, na.sentiment_score
        FROM nlp_annotation na
        JOIN feedback f ON f.id = na.feedback_id
        WHERE na.topic_id = ?
        ORDER BY f.created_at DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(topic_id)
    .bind(paging.page_size)
    .bind(paging.offset)
    .fetch_all(&state.pool)
    .await
    .map_err(Error::from)?;

    let items: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "id": row.get::<String, _>("id"),
                "text": row.get::<String, _>("text"),
                "source": row.get::<String, _>("source"),
                "customer_id": row.get::<Option<String>, _>("customer_id"),
                "created_at": row.get::<String, _>("created_at"),
                "sentiment": row.get::<Option<i64>, _>("sentiment"),
                "sentiment_score": row.get::<Option<f64>, _>("sentiment_score"),
            })
        })
        .collect();

    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": paging.page,
        "page_size": paging.page_size,
        "has_next": paging.offset + paging.page_size < total,
    })))
}

fn audit_to_json(entry: &AuditEntry) -> Value {
    json!({
        "id": entry.id,
        "topic_id": entry.topic_id,
        "action": entry.action.as_str(),
        "old_label": entry.old_label,
        "new_label": entry.new_label,
        "old_keywords": entry.old_keywords,
        "new_keywords": entry.new_keywords,
        "changed_by": entry.changed_by,
        "ip_address": entry.ip_address,
        "user_agent": entry.user_agent,
        "changed_at": entry.changed_at.to_rfc3339(),
    })
}

async fn recent_audit(State(state): State<AppState>, _session: AuthSession) -> ApiResult<Json<Value>> {
    let entries = topics::recent_audit(&state.pool, 50).await?;
    Ok(Json(json!({
        "entries": entries.iter().map(audit_to_json).collect::<Vec<_>>(),
    })))
}

async fn topic_audit(
    State(state): State<AppState>,
    _session: AuthSession,
    Path(topic_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let entries = topics::audit_history(&state.pool, topic_id).await?;
    Ok(Json(json!({
        "topic_id": topic_id,
        "entries": entries.iter().map(audit_to_json).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
struct RelabelRequest {
    topic_id: i64,
    new_label: String,
    #[serde(default)]
    new_keywords: Vec<String>,
}

async fn relabel_topic(
    State(state): State<AppState>,
    session: AdminSession,
    Json(request): Json<RelabelRequest>,
) -> ApiResult<Json<Value>> {
    if request.new_label.trim().is_empty() {
        return Err(ApiError::validation("new_label must not be empty"));
    }

    let session = session.0;
    let updated = tokio::time::timeout(MUTATION_TIMEOUT, async {
        let mut tx = state.pool.begin().await.map_err(Error::from)?;
        let updated = topics::relabel_tx(
            &mut tx,
            request.topic_id,
            request.new_label.trim(),
            &request.new_keywords,
            &session.claims.sub,
            session.ip_address.as_deref(),
            session.user_agent.as_deref(),
        )
        .await?;
        tx.commit().await.map_err(Error::from)?;
        Ok::<_, Error>(updated)
    })
    .await
    .map_err(|_| ApiError(Error::Timeout("Admin mutation exceeded 10s".into())))??;

    let invalidated = state.cache.invalidate_analytics().await;
    aggregates::refresh(&state.pool).await?;

    info!(
        topic_id = request.topic_id,
        changed_by = %session.claims.sub,
        invalidated,
        "Topic relabelled"
    );

    Ok(Json(json!({
        "topic": {
            "id": updated.id,
            "label": updated.label,
            "keywords": updated.keywords,
            "updated_at": updated.updated_at.to_rfc3339(),
        },
        "cache_keys_invalidated": invalidated,
    })))
}

#[derive(Debug, Deserialize)]
struct ReassignRequest {
    feedback_ids: Vec<Uuid>,
    target_topic_id: i64,
    reason: Option<String>,
}

async fn reassign_feedback(
    State(state): State<AppState>,
    session: AdminSession,
    Json(request): Json<ReassignRequest>,
) -> ApiResult<Json<Value>> {
    if request.feedback_ids.is_empty() {
        return Err(ApiError::validation("feedback_ids must not be empty"));
    }

    let session = session.0;
    let reassigned = tokio::time::timeout(MUTATION_TIMEOUT, async {
        let mut tx = state.pool.begin().await.map_err(Error::from)?;

        let target_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM topic WHERE id = ?")
            .bind(request.target_topic_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::from)?;
        if target_exists.is_none() {
            return Err(Error::NotFound(format!(
                "Topic {} not found",
                request.target_topic_id
            )));
        }

        // Any failing row rolls back the whole reassignment
        let mut count = 0usize;
        for feedback_id in &request.feedback_ids {
            let prior =
                annotations::set_topic_tx(&mut tx, *feedback_id, request.target_topic_id).await?;
            topics::append_reassign_audit_tx(
                &mut tx,
                request.target_topic_id,
                prior,
                &feedback_id.to_string(),
                request.reason.as_deref(),
                &session.claims.sub,
                session.ip_address.as_deref(),
                session.user_agent.as_deref(),
            )
            .await?;
            count += 1;
        }

        tx.commit().await.map_err(Error::from)?;
        Ok::<_, Error>(count)
    })
    .await
    .map_err(|_| ApiError(Error::Timeout("Admin mutation exceeded 10s".into())))??;

    let invalidated = state.cache.invalidate_analytics().await;
    aggregates::refresh(&state.pool).await?;

    info!(
        target_topic_id = request.target_topic_id,
        reassigned,
        changed_by = %session.claims.sub,
        "Feedback reassigned"
    );

    Ok(Json(json!({
        "reassigned_count": reassigned,
        "target_topic_id": request.target_topic_id,
        "cache_keys_invalidated": invalidated,
    })))
}

#[derive(Debug, Deserialize)]
struct CleanupRequest {
    days_old: i64,
    #[serde(default = "default_dry_run")]
    dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

async fn cleanup_old_data(
    State(state): State<AppState>,
    _session: AdminSession,
    Json(request): Json<CleanupRequest>,
) -> ApiResult<Json<Value>> {
    if request.days_old < 1 {
        return Err(ApiError::validation("days_old must be at least 1"));
    }

    let cutoff = Utc::now() - ChronoDuration::days(request.days_old);
    let affected = feedback::count_older_than(&state.pool, cutoff).await?;

    if request.dry_run {
        return Ok(Json(json!({
            "dry_run": true,
            "records_to_delete": affected,
            "cutoff_days": request.days_old,
        })));
    }

    let deleted = feedback::delete_older_than(&state.pool, cutoff).await?;
    state.cache.invalidate_analytics().await;
    aggregates::refresh(&state.pool).await?;

    info!(deleted, days_old = request.days_old, "Old data cleaned up");
    Ok(Json(json!({
        "dry_run": false,
        "records_deleted": deleted,
        "cutoff_days": request.days_old,
    })))
}

async fn clear_cache(
    State(state): State<AppState>,
    _session: AdminSession,
) -> ApiResult<Json<Value>> {
    let cleared = state.cache.invalidate_analytics().await;
    Ok(Json(json!({
        "message": "Analytics cache cleared",
        "cleared": cleared,
    })))
}
