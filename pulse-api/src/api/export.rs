//! Streaming CSV exports
//!
//! Each export resolves its filters into one parameterised query, then
//! streams rows through an RFC 4180 encoder into a chunked response body.
//! Nothing buffers the full result set: a producer task walks the row
//! stream and hands chunks of ~500 rows to the response through a small
//! channel. Dropping the response (client disconnect) drops the channel
//! and the producer stops, releasing its connection. A consumer that
//! stalls past the idle timeout is cut off the same way.

use crate::error::ApiResult;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::TryStreamExt;
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Rows per flushed chunk.
const CHUNK_ROWS: usize = 500;

/// How long a stalled consumer may hold the cursor open.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/export/export.csv", get(export_feedback))
        .route("/export/export/topics.csv", get(export_topics))
        .route("/export/export/analytics.csv", get(export_analytics))
}

/// Quote one CSV field per RFC 4180.
fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') || raw.contains('\r') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_record(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

type ChunkResult = Result<Vec<u8>, std::io::Error>;

fn csv_response(filename: &str, rx: mpsc::Receiver<ChunkResult>) -> Response {
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={filename}"),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_default()
}

/// Walk a row stream, encode records, and push chunks to the consumer.
async fn pump_rows<F>(
    pool: SqlitePool,
    sql: String,
    binds: Vec<Option<String>>,
    header_row: &[&str],
    map_row: F,
    tx: mpsc::Sender<ChunkResult>,
) where
    F: Fn(&sqlx::sqlite::SqliteRow) -> Vec<String>,
{
    let mut buffer = csv_record(
        &header_row
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>(),
    )
    .into_bytes();

    // The header flushes immediately so the response starts streaming
    // before the first row lands.
    if tx
        .send_timeout(Ok(std::mem::take(&mut buffer)), IDLE_TIMEOUT)
        .await
        .is_err()
    {
        return;
    }

    let mut query = sqlx::query(&sql);
    for bind in &binds {
        query = query.bind(bind);
    }

    let mut rows = query.fetch(&pool);
    let mut in_chunk = 0usize;
    let mut total = 0usize;

    loop {
        match rows.try_next().await {
            Ok(Some(row)) => {
                buffer.extend_from_slice(csv_record(&map_row(&row)).as_bytes());
                in_chunk += 1;
                total += 1;

                if in_chunk >= CHUNK_ROWS {
                    in_chunk = 0;
                    if tx
                        .send_timeout(Ok(std::mem::take(&mut buffer)), IDLE_TIMEOUT)
                        .await
                        .is_err()
                    {
                        warn!("Export consumer went away, cancelling cursor");
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Export query failed mid-stream");
                let _ = tx
                    .send_timeout(
                        Err(std::io::Error::other(e.to_string())),
                        IDLE_TIMEOUT,
                    )
                    .await;
                return;
            }
        }
    }

    if !buffer.is_empty() {
        let _ = tx.send_timeout(Ok(buffer), IDLE_TIMEOUT).await;
    }
    info!(rows = total, "Export stream complete");
}

#[derive(Debug, Deserialize)]
struct FeedbackExportParams {
    source: Option<String>,
    customer_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    sentiment_min: Option<f64>,
    sentiment_max: Option<f64>,
}

async fn export_feedback(
    State(state): State<AppState>,
    Query(params): Query<FeedbackExportParams>,
) -> ApiResult<Response> {
    let sql = r#"
        SELECT
            f.id, f.text, f.source, f.customer_id,
            na.sentiment_score,
            f.created_at, f.updated_at,
            COALESCE(t.label, '') AS primary_topic,
            COALESCE(t.keywords, '') AS topic_keywords
        FROM feedback f
        LEFT JOIN nlp_annotation na ON f.id = na.feedback_id
        LEFT JOIN topic t ON na.topic_id = t.id
        WHERE (?1 IS NULL OR f.source = ?1)
          AND (?2 IS NULL OR f.customer_id = ?2)
          AND (?3 IS NULL OR date(f.created_at) >= ?3)
          AND (?4 IS NULL OR date(f.created_at) <= ?4)
          AND (?5 IS NULL OR na.sentiment_score >= CAST(?5 AS REAL))
          AND (?6 IS NULL OR na.sentiment_score <= CAST(?6 AS REAL))
        ORDER BY f.created_at DESC
    "#
    .to_string();

    let binds = vec![
        params.source,
        params.customer_id,
        params.start_date,
        params.end_date,
        params.sentiment_min.map(|v| v.to_string()),
        params.sentiment_max.map(|v| v.to_string()),
    ];

    let (tx, rx) = mpsc::channel(4);
    let pool = state.pool.clone();
    tokio::spawn(async move {
        pump_rows(
            pool,
            sql,
            binds,
            &[
                "id",
                "text",
                "source",
                "customer_id",
                "sentiment_score",
                "created_at",
                "updated_at",
                "primary_topic",
                "topic_keywords",
            ],
            |row| {
                vec![
                    row.get::<String, _>("id"),
                    row.get::<String, _>("text"),
                    row.get::<String, _>("source"),
                    row.get::<Option<String>, _>("customer_id").unwrap_or_default(),
                    row.get::<Option<f64>, _>("sentiment_score")
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                    row.get::<String, _>("created_at"),
                    row.get::<String, _>("updated_at"),
                    row.get::<String, _>("primary_topic"),
                    row.get::<String, _>("topic_keywords"),
                ]
            },
            tx,
        )
        .await;
    });

    Ok(csv_response("feedback_export.csv", rx))
}

#[derive(Debug, Deserialize)]
struct TopicsExportParams {
    min_feedback_count: Option<i64>,
}

async fn export_topics(
    State(state): State<AppState>,
    Query(params): Query<TopicsExportParams>,
) -> ApiResult<Response> {
    let sql = r#"
        SELECT
            t.id, t.label, t.keywords, t.created_at, t.updated_at,
            COUNT(na.feedback_id) AS feedback_count,
            AVG(na.sentiment_score) AS avg_sentiment
        FROM topic t
        LEFT JOIN nlp_annotation na ON t.id = na.topic_id
        GROUP BY t.id, t.label, t.keywords, t.created_at, t.updated_at
        HAVING COUNT(na.feedback_id) >= CAST(?1 AS INTEGER)
        ORDER BY feedback_count DESC, t.created_at DESC
    "#
    .to_string();

    let binds = vec![Some(params.min_feedback_count.unwrap_or(1).to_string())];

    let (tx, rx) = mpsc::channel(4);
    let pool = state.pool.clone();
    tokio::spawn(async move {
        pump_rows(
            pool,
            sql,
            binds,
            &[
                "id",
                "label",
                "keywords",
                "created_at",
                "updated_at",
                "feedback_count",
                "avg_sentiment",
            ],
            |row| {
                vec![
                    row.get::<i64, _>("id").to_string(),
                    row.get::<String, _>("label"),
                    row.get::<String, _>("keywords"),
                    row.get::<String, _>("created_at"),
                    row.get::<String, _>("updated_at"),
                    row.get::<i64, _>("feedback_count").to_string(),
                    row.get::<Option<f64>, _>("avg_sentiment")
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                ]
            },
            tx,
        )
        .await;
    });

    Ok(csv_response("topics_export.csv", rx))
}

#[derive(Debug, Deserialize)]
struct AnalyticsExportParams {
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn export_analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsExportParams>,
) -> ApiResult<Response> {
    let sql = r#"
        SELECT
            date, total_feedback,
            positive_count AS positive_feedback,
            negative_count AS negative_feedback,
            neutral_count AS neutral_feedback,
            avg_sentiment_score AS avg_sentiment,
            unique_customers, top_sources
        FROM daily_feedback_aggregates
        WHERE (?1 IS NULL OR date >= ?1)
          AND (?2 IS NULL OR date <= ?2)
        ORDER BY date DESC
    "#
    .to_string();

    let binds = vec![params.start_date, params.end_date];

    let (tx, rx) = mpsc::channel(4);
    let pool = state.pool.clone();
    tokio::spawn(async move {
        pump_rows(
            pool,
            sql,
            binds,
            &[
                "date",
                "total_feedback",
                "positive_feedback",
                "negative_feedback",
                "neutral_feedback",
                "avg_sentiment",
                "unique_customers",
                "top_sources",
            ],
            |row| {
                vec![
                    row.get::<String, _>("date"),
                    row.get::<i64, _>("total_feedback").to_string(),
                    row.get::<i64, _>("positive_feedback").to_string(),
                    row.get::<i64, _>("negative_feedback").to_string(),
                    row.get::<i64, _>("neutral_feedback").to_string(),
                    row.get::<Option<f64>, _>("avg_sentiment")
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                    row.get::<i64, _>("unique_customers").to_string(),
                    row.get::<String, _>("top_sources"),
                ]
            },
            tx,
        )
        .await;
    });

    Ok(csv_response("analytics_export.csv", rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_csv_record_terminator() {
        let record = csv_record(&["a".into(), "b,c".into()]);
        assert_eq!(record, "a,\"b,c\"\r\n");
    }
}
