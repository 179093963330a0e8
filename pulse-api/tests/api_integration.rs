//! Integration tests for the pulse API surface
//!
//! Drives the full router (middleware included) through oneshot requests
//! against an in-memory store.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use pulse_api::{build_router, AppState};
use pulse_common::config::Settings;
use pulse_common::db::{self, annotations, feedback, topics};
use pulse_common::models::Feedback;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_state(settings: Settings) -> AppState {
    let pool = db::connect_memory().await.unwrap();
    AppState::new(pool, settings)
}

async fn test_app() -> (Router, AppState) {
    let state = test_state(Settings::default()).await;
    (build_router(state.clone()), state)
}

async fn request(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value, axum::http::HeaderMap) {
    let mut builder = Request::builder().method(method).uri(path);
    if body.is_some() {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
    }
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value, headers)
}

async fn raw_body(app: &Router, path: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

async fn login_admin(app: &Router) -> String {
    let (status, body, _) = request(
        app,
        Method::POST,
        "/admin/login",
        Some(json!({ "username": "admin", "password": "admin123" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["access_token"].as_str().unwrap().to_string()
}

async fn login_viewer(app: &Router) -> String {
    let (status, body, _) = request(
        app,
        Method::POST,
        "/admin/viewer/login",
        Some(json!({ "username": "viewer", "password": "viewer123" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoints() {
    let (app, _) = test_app().await;

    let (status, body, _) = request(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = raw_body(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_metrics_hidden_outside_debug() {
    let (app, _) = test_app().await;
    let (status, _) = raw_body(&app, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut settings = Settings::default();
    settings.debug = true;
    let app = build_router(test_state(settings).await);
    let (status, _) = raw_body(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_create_feedback_and_fetch_detail() {
    let (app, state) = test_app().await;

    let (status, body, _) = request(
        &app,
        Method::POST,
        "/ingest/feedback",
        Some(json!({ "source": "website", "text": "Great product!", "customer_id": "c1" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    // An annotate job was enqueued for the new row
    let stats = state.queue.stats().await.unwrap();
    assert_eq!(stats["annotate"].queued, 1);

    let (status, detail, _) =
        request(&app, Method::GET, &format!("/api/feedback/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["text"], "Great product!");
    assert_eq!(detail["source"], "website");
    assert!(detail["normalized_text"].as_str().is_some());
}

#[tokio::test]
async fn test_create_feedback_rejects_empty_body() {
    let (app, _) = test_app().await;
    let (status, _, _) = request(
        &app,
        Method::POST,
        "/ingest/feedback",
        Some(json!({ "source": "website", "text": "   " })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_create_dedupes_in_order() {
    let (app, _) = test_app().await;

    let (status, body, _) = request(
        &app,
        Method::POST,
        "/ingest/feedback/batch",
        Some(json!([
            { "source": "web", "text": "Same thing", "customer_id": "c1" },
            { "source": "web", "text": "  SAME   thing ", "customer_id": "c1" },
            { "source": "web", "text": "" },
            { "source": "web", "text": "Different thing", "customer_id": "c1" }
        ])),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created_count"], 2);
    assert_eq!(body["duplicate_count"], 1);
    assert_eq!(body["error_count"], 1);

    let outcomes = body["outcomes"].as_array().unwrap();
    assert_eq!(outcomes[0]["outcome"], "created");
    assert_eq!(outcomes[1]["outcome"], "duplicate");
    assert_eq!(outcomes[1]["of"], outcomes[0]["id"]);
    assert_eq!(outcomes[2]["outcome"], "error");
    assert_eq!(outcomes[3]["outcome"], "created");
}

fn multipart_csv(boundary: &str, csv: &str) -> Vec<u8> {
    format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"source\"\r\n\r\n\
         csv_upload\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"feedback.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {csv}\r\n\
         --{boundary}--\r\n"
    )
    .into_bytes()
}

#[tokio::test]
async fn test_csv_upload_counts_duplicates() {
    let (app, _) = test_app().await;
    let boundary = "pulsetestboundary";
    let csv = "text,customer_id\nGreat stuff,c1\nGreat stuff,c1\n";

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/ingest/upload/csv")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(multipart_csv(boundary, csv)))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["processed_count"], 2);
    assert_eq!(body["created_count"], 1);
    assert_eq!(body["duplicate_count"], 1);
    assert_eq!(body["error_count"], 0);
    assert!(body["batch_id"].as_str().is_some());
    assert!(body["job_id"].as_str().is_some());
}

async fn seed_annotated(state: &AppState, text: &str, sentiment: i64) -> uuid::Uuid {
    let f = Feedback::new("website".into(), text.into(), Some("c1".into()));
    feedback::insert(&state.pool, &f).await.unwrap();
    annotations::upsert_scores(&state.pool, f.id, sentiment, sentiment as f64 * 0.8, None, "lexicon-v1")
        .await
        .unwrap();
    f.id
}

#[tokio::test]
async fn test_analytics_summary_reflects_data() {
    let (app, state) = test_app().await;
    seed_annotated(&state, "love it", 1).await;
    seed_annotated(&state, "hate it", -1).await;

    let (status, body, _) = request(&app, Method::GET, "/analytics/summary", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_feedback"], 2);
    assert_eq!(body["negative_count"], 1);
    assert_eq!(body["negative_percentage"], 50.0);
    assert!(body["daily_trend"].as_array().unwrap().len() >= 1);
}

#[tokio::test]
async fn test_analytics_cached_response_is_byte_identical() {
    let (app, state) = test_app().await;
    seed_annotated(&state, "love it", 1).await;

    let (_, first) = raw_body(&app, "/analytics/sentiment-trends?group_by=day").await;

    // New data lands, but the cached body keeps serving within the TTL
    seed_annotated(&state, "more praise", 1).await;
    let (_, second) = raw_body(&app, "/analytics/sentiment-trends?group_by=day").await;
    assert_eq!(first, second);

    // Different parameters miss the cache
    let (_, weekly) = raw_body(&app, "/analytics/sentiment-trends?group_by=week").await;
    assert_ne!(first, weekly);
}

#[tokio::test]
async fn test_analytics_rejects_bad_params() {
    let (app, _) = test_app().await;

    let (status, _, _) = request(
        &app,
        Method::GET,
        "/analytics/sentiment-trends?group_by=hour",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = request(
        &app,
        Method::GET,
        "/analytics/toxicity?threshold=1.5",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_prefix_is_an_alias() {
    let (app, state) = test_app().await;
    seed_annotated(&state, "love it", 1).await;

    let (status, body, _) = request(&app, Method::GET, "/api/summary", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_feedback"], 1);
}

#[tokio::test]
async fn test_admin_requires_auth_and_role() {
    let (app, state) = test_app().await;
    let topic_id = topics::create(&state.pool, "misc", &[], "system").await.unwrap();

    let relabel = json!({ "topic_id": topic_id, "new_label": "billing", "new_keywords": ["invoice"] });

    // No token
    let (status, _, _) = request(&app, Method::POST, "/admin/relabel-topic", Some(relabel.clone()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Viewer token cannot mutate
    let viewer = login_viewer(&app).await;
    let (status, _, _) = request(
        &app,
        Method::POST,
        "/admin/relabel-topic",
        Some(relabel.clone()),
        Some(&viewer),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // But a viewer can read
    let (status, _, _) = request(&app, Method::GET, "/admin/stats", None, Some(&viewer)).await;
    assert_eq!(status, StatusCode::OK);

    // Admin succeeds
    let admin = login_admin(&app).await;
    let (status, body, _) = request(
        &app,
        Method::POST,
        "/admin/relabel-topic",
        Some(relabel),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["topic"]["label"], "billing");
}

#[tokio::test]
async fn test_bad_credentials_rejected() {
    let (app, _) = test_app().await;
    let (status, _, _) = request(
        &app,
        Method::POST,
        "/admin/login",
        Some(json!({ "username": "admin", "password": "wrong" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_relabel_writes_audit_entry() {
    let (app, state) = test_app().await;
    let topic_id = topics::create(&state.pool, "shiping", &[], "system").await.unwrap();
    let admin = login_admin(&app).await;

    let (status, _, _) = request(
        &app,
        Method::POST,
        "/admin/relabel-topic",
        Some(json!({ "topic_id": topic_id, "new_label": "shipping", "new_keywords": ["delivery"] })),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = request(
        &app,
        Method::GET,
        &format!("/admin/topic-audit/{topic_id}"),
        None,
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries[0]["action"], "relabel");
    assert_eq!(entries[0]["old_label"], "shiping");
    assert_eq!(entries[0]["new_label"], "shipping");
    assert_eq!(entries[0]["changed_by"], "admin");
}

#[tokio::test]
async fn test_relabel_unknown_topic_is_404() {
    let (app, _) = test_app().await;
    let admin = login_admin(&app).await;
    let (status, _, _) = request(
        &app,
        Method::POST,
        "/admin/relabel-topic",
        Some(json!({ "topic_id": 9999, "new_label": "x" })),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reassign_feedback_moves_annotations_and_audits() {
    let (app, state) = test_app().await;
    let topic_a = topics::create(&state.pool, "topic-a", &[], "system").await.unwrap();
    let topic_b = topics::create(&state.pool, "topic-b", &[], "system").await.unwrap();

    let f1 = seed_annotated(&state, "first complaint", -1).await;
    let f2 = seed_annotated(&state, "second complaint", -1).await;
    for id in [f1, f2] {
        annotations::set_topic(&state.pool, id, topic_a).await.unwrap();
    }

    let admin = login_admin(&app).await;
    let (status, body, _) = request(
        &app,
        Method::POST,
        "/admin/reassign-feedback",
        Some(json!({
            "feedback_ids": [f1.to_string(), f2.to_string()],
            "target_topic_id": topic_b,
            "reason": "misclassified"
        })),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reassigned_count"], 2);

    for id in [f1, f2] {
        let annotation = annotations::load_for_feedback(&state.pool, id).await.unwrap().unwrap();
        assert_eq!(annotation.topic_id, Some(topic_b));
    }

    // One audit entry per reassigned feedback, carrying the old topic
    let (_, audit, _) = request(
        &app,
        Method::GET,
        &format!("/admin/topic-audit/{topic_b}"),
        None,
        Some(&admin),
    )
    .await;
    let entries = audit["entries"].as_array().unwrap();
    let reassigns: Vec<_> = entries
        .iter()
        .filter(|e| e["action"] == "reassign_feedback")
        .collect();
    assert_eq!(reassigns.len(), 2);
    assert_eq!(reassigns[0]["old_label"], format!("topic_id={topic_a}"));
    assert_eq!(reassigns[0]["new_label"], format!("topic_id={topic_b}"));
}

#[tokio::test]
async fn test_reassign_rolls_back_on_unknown_feedback() {
    let (app, state) = test_app().await;
    let topic_a = topics::create(&state.pool, "topic-a", &[], "system").await.unwrap();
    let topic_b = topics::create(&state.pool, "topic-b", &[], "system").await.unwrap();
    let f1 = seed_annotated(&state, "complaint", -1).await;
    annotations::set_topic(&state.pool, f1, topic_a).await.unwrap();

    let admin = login_admin(&app).await;
    let (status, _, _) = request(
        &app,
        Method::POST,
        "/admin/reassign-feedback",
        Some(json!({
            "feedback_ids": [f1.to_string(), uuid::Uuid::new_v4().to_string()],
            "target_topic_id": topic_b
        })),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Partial failure rolled back: f1 still on topic A
    let annotation = annotations::load_for_feedback(&state.pool, f1).await.unwrap().unwrap();
    assert_eq!(annotation.topic_id, Some(topic_a));
}

#[tokio::test]
async fn test_mutation_invalidates_analytics_cache() {
    let (app, state) = test_app().await;
    let topic_id = topics::create(&state.pool, "quality", &[], "system").await.unwrap();
    let fid = seed_annotated(&state, "poor quality", -1).await;
    annotations::set_topic(&state.pool, fid, topic_id).await.unwrap();

    // Prime the cache
    let (_, before, _) = request(&app, Method::GET, "/analytics/topics", None, None).await;
    assert_eq!(before.as_array().unwrap()[0]["label"], "quality");

    let admin = login_admin(&app).await;
    let (status, _, _) = request(
        &app,
        Method::POST,
        "/admin/relabel-topic",
        Some(json!({ "topic_id": topic_id, "new_label": "product quality" })),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The mutation dropped the cached body; the fresh read sees the new label
    let (_, after, _) = request(&app, Method::GET, "/analytics/topics", None, None).await;
    assert_eq!(after.as_array().unwrap()[0]["label"], "product quality");
}

#[tokio::test]
async fn test_rate_limit_answers_429_with_retry_after() {
    let mut settings = Settings::default();
    settings.rate_limit.burst_limit = 3;
    let state = test_state(settings).await;
    let app = build_router(state);

    for _ in 0..3 {
        let (status, _, headers) = request(&app, Method::GET, "/health", None, None).await;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.get("x-ratelimit-limit").is_some());
        assert!(headers.get("x-ratelimit-remaining").is_some());
    }

    let (status, _, headers) = request(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap();
    assert!(retry_after >= 1);

    // The general bucket refills at one token per second; waiting the
    // advertised interval admits the next request.
    tokio::time::sleep(std::time::Duration::from_secs(retry_after)).await;
    let (status, _, _) = request(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_feedback_export_streams_csv() {
    let (app, state) = test_app().await;
    seed_annotated(&state, "quoted \"text\", with comma", 1).await;
    seed_annotated(&state, "plain row", -1).await;

    let (status, body) = raw_body(&app, "/api/export/export.csv?source=website").await;
    assert_eq!(status, StatusCode::OK);

    let mut lines = body.lines();
    assert_eq!(
        lines.next().unwrap(),
        "id,text,source,customer_id,sentiment_score,created_at,updated_at,primary_topic,topic_keywords"
    );
    let rows: Vec<&str> = lines.filter(|l| !l.is_empty()).collect();
    assert_eq!(rows.len(), 2);
    assert!(body.contains("\"quoted \"\"text\"\", with comma\""));

    // Distinct ids
    let ids: Vec<&str> = rows.iter().map(|r| r.split(',').next().unwrap()).collect();
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_topics_and_analytics_exports() {
    let (app, state) = test_app().await;
    let topic_id = topics::create(&state.pool, "checkout", &["slow".into()], "system")
        .await
        .unwrap();
    let fid = seed_annotated(&state, "checkout is slow", -1).await;
    annotations::set_topic(&state.pool, fid, topic_id).await.unwrap();
    pulse_common::db::aggregates::refresh(&state.pool).await.unwrap();

    let (status, body) = raw_body(&app, "/api/export/export/topics.csv").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("id,label,keywords,created_at,updated_at,feedback_count,avg_sentiment"));
    assert!(body.contains("checkout"));

    let (status, body) = raw_body(&app, "/api/export/export/analytics.csv").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(
        "date,total_feedback,positive_feedback,negative_feedback,neutral_feedback,avg_sentiment,unique_customers,top_sources"
    ));
}

#[tokio::test]
async fn test_chat_query_without_llm_is_unavailable() {
    let (app, _) = test_app().await;
    let (status, _, _) = request(
        &app,
        Method::POST,
        "/chat/query",
        Some(json!({ "question": "what do customers say?" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_chat_query_rejects_oversized_question() {
    let (app, _) = test_app().await;
    let (status, _, _) = request(
        &app,
        Method::POST,
        "/chat/query",
        Some(json!({ "question": "x".repeat(1001) })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_chat_suggestions_and_memory() {
    let (app, _) = test_app().await;

    let (status, body, _) = request(&app, Method::GET, "/chat/suggestions", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["suggestions"].as_array().unwrap().is_empty());

    let (status, body, _) = request(&app, Method::GET, "/chat/conversations", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, _, _) = request(&app, Method::POST, "/chat/clear-memory", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

/// Scripted model used to exercise the QA path end to end.
struct CannedLlm {
    replies: std::sync::Mutex<Vec<pulse_api::agent::llm::LlmReply>>,
}

#[async_trait::async_trait]
impl pulse_api::agent::llm::LlmClient for CannedLlm {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[pulse_api::agent::llm::LlmMessage],
    ) -> pulse_common::Result<pulse_api::agent::llm::LlmReply> {
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(pulse_common::Error::Unavailable("script exhausted".into()));
        }
        Ok(replies.remove(0))
    }
}

#[tokio::test]
async fn test_chat_query_end_to_end_with_citations() {
    use pulse_api::agent::llm::LlmReply;

    let state = test_state(Settings::default()).await;
    let fid = seed_annotated(&state, "the checkout flow is totally broken", -1).await;

    let answer = format!(
        "One customer reported \"the checkout flow is totally broken\" (feedback_id: {fid})."
    );
    let llm = CannedLlm {
        replies: std::sync::Mutex::new(vec![
            LlmReply::ToolCall {
                tool: "vector_examples".into(),
                arguments: json!({ "sentiment": -1, "limit": 5 }),
            },
            LlmReply::Final { answer },
        ]),
    };
    let state = state.with_llm(std::sync::Arc::new(llm));
    let app = build_router(state.clone());

    let (status, body, _) = request(
        &app,
        Method::POST,
        "/chat/query",
        Some(json!({
            "question": "Show me examples of negative feedback about product quality",
            "filters": { "sentiment": -1 }
        })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let citations = body["citations"].as_array().unwrap();
    assert_eq!(citations.len(), 1);
    let cited = citations[0]["feedback_id"].as_str().unwrap();
    assert_eq!(cited, fid.to_string());

    // Every cited feedback id resolves
    let (status, detail, _) =
        request(&app, Method::GET, &format!("/api/feedback/{cited}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let quoted = detail["text"].as_str().unwrap();
    assert!(body["answer"].as_str().unwrap().contains(quoted));

    // The exchange landed in conversation memory
    let (_, history, _) = request(&app, Method::GET, "/chat/conversations", None, None).await;
    assert_eq!(history["total"], 1);
}

#[tokio::test]
async fn test_request_id_header_present() {
    let (app, _) = test_app().await;
    let (_, _, headers) = request(&app, Method::GET, "/health", None, None).await;
    assert!(headers.get("x-request-id").is_some());
}

#[tokio::test]
async fn test_daily_aggregates_pagination_envelope() {
    let (app, state) = test_app().await;
    seed_annotated(&state, "solid", 1).await;
    pulse_common::db::aggregates::refresh(&state.pool).await.unwrap();

    let (status, body, _) = request(
        &app,
        Method::GET,
        "/analytics/daily-aggregates?page=1&page_size=10",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["page"], 1);
    assert_eq!(body["has_next"], false);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}
