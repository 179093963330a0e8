//! Ingestion endpoints
//!
//! Single create, bulk create, and streamed CSV/JSONL uploads. Uploads
//! parse row by row without buffering the whole file, dedupe within the
//! batch on (normalised text, source, customer id), persist in chunks,
//! and hand the batch to the enrichment pipeline.

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use pulse_common::db::{batches, feedback};
use pulse_common::models::{Batch, Feedback, RowOutcome};
use pulse_common::queue::{JobPayload, QUEUE_ANNOTATE, QUEUE_INGEST};
use pulse_common::text;
use pulse_common::Error;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::info;
use uuid::Uuid;

/// Maximum items in one bulk create request.
const MAX_BATCH_ITEMS: usize = 1000;

/// Rows persisted per transaction during uploads.
const UPLOAD_CHUNK_SIZE: usize = 500;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/feedback", post(create_feedback))
        .route("/feedback/batch", post(create_feedback_batch))
        .route("/upload/csv", post(upload_csv))
        .route("/upload/json", post(upload_jsonl))
}

#[derive(Debug, Deserialize)]
struct CreateFeedbackRequest {
    source: String,
    #[serde(alias = "body")]
    text: String,
    customer_id: Option<String>,
    #[serde(default)]
    meta: BTreeMap<String, Value>,
}

async fn create_feedback(
    State(state): State<AppState>,
    Json(request): Json<CreateFeedbackRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if request.text.trim().is_empty() {
        return Err(ApiError::validation("Feedback body must not be empty"));
    }
    if request.source.trim().is_empty() {
        return Err(ApiError::validation("Source must not be empty"));
    }

    let processed = text::process_text(&request.text, false);
    let mut row = Feedback::new(request.source, request.text, request.customer_id)
        .with_meta(request.meta);
    row.normalized_text = Some(processed.normalized);
    row.detected_language = processed.detected_language.map(|s| s.to_string());

    feedback::insert(&state.pool, &row).await?;

    // Normalisation already happened inline, so the single-item path goes
    // straight to annotation.
    state
        .queue
        .enqueue(
            QUEUE_ANNOTATE,
            &JobPayload::Batch {
                batch_id: Uuid::new_v4(),
                feedback_ids: vec![row.id],
                source: row.source.clone(),
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": row.id.to_string(),
            "source": row.source,
            "customer_id": row.customer_id,
            "created_at": row.created_at.to_rfc3339(),
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    source: Option<String>,
    #[serde(alias = "body")]
    text: Option<String>,
    customer_id: Option<String>,
    #[serde(default)]
    meta: BTreeMap<String, Value>,
}

async fn create_feedback_batch(
    State(state): State<AppState>,
    Json(items): Json<Vec<BatchItem>>,
) -> ApiResult<Json<serde_json::Value>> {
    if items.len() > MAX_BATCH_ITEMS {
        return Err(ApiError(Error::TooLarge(format!(
            "Batch exceeds {MAX_BATCH_ITEMS} items"
        ))));
    }

    let mut outcomes: Vec<RowOutcome> = Vec::with_capacity(items.len());
    let mut accepted: Vec<Feedback> = Vec::new();
    let mut seen: HashMap<String, Uuid> = HashMap::new();

    for item in items {
        let Some(body) = item.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            outcomes.push(RowOutcome::Error {
                reason: "Missing or empty 'text' field".into(),
            });
            continue;
        };
        let source = item.source.clone().unwrap_or_else(|| "api".to_string());

        let processed = text::process_text(body, false);
        let key = text::dedup_key(&processed.normalized, &source, item.customer_id.as_deref());
        if let Some(original) = seen.get(&key) {
            outcomes.push(RowOutcome::Duplicate { of: *original });
            continue;
        }

        let mut row = Feedback::new(source, body.to_string(), item.customer_id)
            .with_meta(item.meta);
        row.normalized_text = Some(processed.normalized);
        row.detected_language = processed.detected_language.map(|s| s.to_string());

        seen.insert(key, row.id);
        outcomes.push(RowOutcome::Created { id: row.id });
        accepted.push(row);
    }

    // All accepted rows land in one transaction
    let mut tx = state.pool.begin().await.map_err(Error::from)?;
    for row in &accepted {
        feedback::insert_tx(&mut tx, row).await?;
    }
    tx.commit().await.map_err(Error::from)?;

    if !accepted.is_empty() {
        state
            .queue
            .enqueue(
                QUEUE_ANNOTATE,
                &JobPayload::Batch {
                    batch_id: Uuid::new_v4(),
                    feedback_ids: accepted.iter().map(|r| r.id).collect(),
                    source: "batch_api".into(),
                },
            )
            .await?;
    }

    let created = accepted.len();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, RowOutcome::Duplicate { .. }))
        .count();
    info!(created, duplicates, "Bulk create complete");

    Ok(Json(json!({
        "outcomes": outcomes,
        "created_count": created,
        "duplicate_count": duplicates,
        "error_count": outcomes.iter().filter(|o| matches!(o, RowOutcome::Error { .. })).count(),
    })))
}

/// Accumulates upload rows, dedupes, and flushes chunks to the store.
struct UploadAccumulator {
    batch: Batch,
    seen: HashMap<String, Uuid>,
    pending: Vec<Feedback>,
    created_ids: Vec<Uuid>,
}

impl UploadAccumulator {
    fn new(source: &str) -> Self {
        Self {
            batch: Batch::new(source.to_string()),
            seen: HashMap::new(),
            pending: Vec::new(),
            created_ids: Vec::new(),
        }
    }

    async fn push(
        &mut self,
        state: &AppState,
        body: &str,
        customer_id: Option<String>,
        mut meta: BTreeMap<String, Value>,
    ) -> ApiResult<()> {
        self.batch.processed_count += 1;

        if body.trim().is_empty() {
            self.batch.error_count += 1;
            return Ok(());
        }

        let normalized = text::normalize_text(body);
        let key = text::dedup_key(&normalized, &self.batch.source, customer_id.as_deref());
        if self.seen.contains_key(&key) {
            self.batch.duplicate_count += 1;
            return Ok(());
        }

        meta.insert("batch_id".into(), Value::String(self.batch.id.to_string()));
        let row = Feedback::new(self.batch.source.clone(), body.to_string(), customer_id)
            .with_meta(meta);

        self.seen.insert(key, row.id);
        self.batch.created_count += 1;
        self.created_ids.push(row.id);
        self.pending.push(row);

        if self.pending.len() >= UPLOAD_CHUNK_SIZE {
            self.flush(state).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, state: &AppState) -> ApiResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = &self.pending;
        pulse_common::db::with_retry("upload chunk insert", || async {
            let mut tx = state.pool.begin().await?;
            for row in rows {
                feedback::insert_tx(&mut tx, row).await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await?;
        self.pending.clear();
        Ok(())
    }

    /// Persist the batch row, enqueue the enrichment job, and render the
    /// response body.
    async fn finish(mut self, state: &AppState) -> ApiResult<Json<serde_json::Value>> {
        self.flush(state).await?;
        batches::insert(&state.pool, &self.batch).await?;

        let mut job_id = None;
        if !self.created_ids.is_empty() {
            let id = state
                .queue
                .enqueue(
                    QUEUE_INGEST,
                    &JobPayload::Batch {
                        batch_id: self.batch.id,
                        feedback_ids: self.created_ids.clone(),
                        source: self.batch.source.clone(),
                    },
                )
                .await?;
            batches::set_job(&state.pool, self.batch.id, id).await?;
            job_id = Some(id);
        }

        info!(
            batch_id = %self.batch.id,
            processed = self.batch.processed_count,
            created = self.batch.created_count,
            duplicates = self.batch.duplicate_count,
            errors = self.batch.error_count,
            "Upload accepted"
        );

        Ok(Json(json!({
            "batch_id": self.batch.id.to_string(),
            "job_id": job_id.map(|id| id.to_string()),
            "processed_count": self.batch.processed_count,
            "created_count": self.batch.created_count,
            "duplicate_count": self.batch.duplicate_count,
            "error_count": self.batch.error_count,
        })))
    }
}

/// Split one CSV record honouring RFC 4180 quoting.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Pulls complete lines out of streamed byte chunks.
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8]) -> ApiResult<Vec<String>> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = std::str::from_utf8(&raw[..raw.len() - 1])
                .map_err(|_| ApiError::validation("File must be UTF-8 encoded"))?
                .trim_end_matches('\r')
                .to_string();
            lines.push(line);
        }
        Ok(lines)
    }

    fn remainder(self) -> ApiResult<Option<String>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8(self.buffer)
            .map_err(|_| ApiError::validation("File must be UTF-8 encoded"))?;
        let trimmed = line.trim_end_matches('\r').to_string();
        Ok(if trimmed.is_empty() { None } else { Some(trimmed) })
    }
}

async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut source = "csv_upload".to_string();
    let mut accumulator: Option<UploadAccumulator> = None;
    let mut header: Option<Vec<String>> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("source") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation(format!("Bad source field: {e}")))?;
                if !value.trim().is_empty() {
                    source = value;
                }
            }
            Some("file") => {
                let acc = accumulator.get_or_insert_with(|| UploadAccumulator::new(&source));
                let mut lines = LineBuffer::new();

                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::validation(format!("Upload stream failed: {e}")))?
                {
                    for line in lines.push(&chunk)? {
                        process_csv_line(&state, acc, &mut header, &line).await?;
                    }
                }
                if let Some(line) = lines.remainder()? {
                    process_csv_line(&state, acc, &mut header, &line).await?;
                }
            }
            _ => {}
        }
    }

    let Some(acc) = accumulator else {
        return Err(ApiError::validation("Missing 'file' field"));
    };
    if header.is_none() {
        return Err(ApiError::validation("CSV file is empty"));
    }
    acc.finish(&state).await
}

async fn process_csv_line(
    state: &AppState,
    acc: &mut UploadAccumulator,
    header: &mut Option<Vec<String>>,
    line: &str,
) -> ApiResult<()> {
    if line.trim().is_empty() {
        return Ok(());
    }

    let fields = split_csv_line(line);
    let Some(columns) = header else {
        let names: Vec<String> = fields.iter().map(|f| f.trim().to_lowercase()).collect();
        if !names.iter().any(|n| n == "text") {
            return Err(ApiError::validation("CSV must contain a 'text' column"));
        }
        *header = Some(names);
        return Ok(());
    };

    let mut record: BTreeMap<String, String> = BTreeMap::new();
    for (i, name) in columns.iter().enumerate() {
        record.insert(name.clone(), fields.get(i).cloned().unwrap_or_default());
    }

    let body = record.remove("text").unwrap_or_default();
    let customer_id = record.remove("customer_id").filter(|s| !s.is_empty());
    let meta: BTreeMap<String, Value> = record
        .into_iter()
        .filter(|(k, _)| k != "id" && k != "source")
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    acc.push(state, &body, customer_id, meta).await
}

async fn upload_jsonl(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut source = "json_upload".to_string();
    let mut accumulator: Option<UploadAccumulator> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("source") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation(format!("Bad source field: {e}")))?;
                if !value.trim().is_empty() {
                    source = value;
                }
            }
            Some("file") => {
                let acc = accumulator.get_or_insert_with(|| UploadAccumulator::new(&source));
                let mut lines = LineBuffer::new();

                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::validation(format!("Upload stream failed: {e}")))?
                {
                    for line in lines.push(&chunk)? {
                        process_jsonl_line(&state, acc, &line).await?;
                    }
                }
                if let Some(line) = lines.remainder()? {
                    process_jsonl_line(&state, acc, &line).await?;
                }
            }
            _ => {}
        }
    }

    let Some(acc) = accumulator else {
        return Err(ApiError::validation("Missing 'file' field"));
    };
    acc.finish(&state).await
}

async fn process_jsonl_line(
    state: &AppState,
    acc: &mut UploadAccumulator,
    line: &str,
) -> ApiResult<()> {
    if line.trim().is_empty() {
        return Ok(());
    }

    let Ok(value) = serde_json::from_str::<Value>(line) else {
        acc.batch.processed_count += 1;
        acc.batch.error_count += 1;
        return Ok(());
    };
    let Some(object) = value.as_object() else {
        acc.batch.processed_count += 1;
        acc.batch.error_count += 1;
        return Ok(());
    };

    let body = object.get("text").and_then(|v| v.as_str()).unwrap_or("");
    let customer_id = object
        .get("customer_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let meta: BTreeMap<String, Value> = object
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "text" | "customer_id" | "id" | "source"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    acc.push(state, body, customer_id, meta).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_csv_plain() {
        assert_eq!(split_csv_line("a,b,c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_csv_quoted_comma_and_escape() {
        assert_eq!(
            split_csv_line(r#""hello, world","she said ""hi""",plain"#),
            vec!["hello, world", r#"she said "hi""#, "plain"]
        );
    }

    #[test]
    fn test_split_csv_empty_fields() {
        assert_eq!(split_csv_line("a,,c"), vec!["a", "", "c"]);
    }

    #[test]
    fn test_line_buffer_reassembles_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"first li").unwrap(), Vec::<String>::new());
        assert_eq!(buffer.push(b"ne\r\nsecond").unwrap(), vec!["first line"]);
        assert_eq!(buffer.remainder().unwrap(), Some("second".to_string()));
    }

    #[test]
    fn test_line_buffer_rejects_invalid_utf8() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&[0xff, 0xfe, b'\n']).is_err());
    }
}
