//! Analytics endpoints
//!
//! All read-only and cache-through. `/analytics/*` is the canonical
//! prefix; the same router is mounted under `/api` as a compatibility
//! alias.

use crate::analytics::{self, queries, DateRange, GroupBy};
use crate::error::ApiResult;
use crate::pagination::{self, Page};
use crate::AppState;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use pulse_common::db::aggregates;
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sentiment-trends", get(sentiment_trends))
        .route("/volume-trends", get(volume_trends))
        .route("/daily-aggregates", get(daily_aggregates))
        .route("/customers", get(customers))
        .route("/sources", get(sources))
        .route("/toxicity", get(toxicity))
        .route("/summary", get(summary))
        .route("/topics", get(topics))
        .route("/examples", get(examples))
        .route("/dashboard/summary", get(dashboard_summary))
}

#[derive(Debug, Deserialize)]
struct TrendParams {
    group_by: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn sentiment_trends(
    State(state): State<AppState>,
    Query(params): Query<TrendParams>,
) -> ApiResult<Response> {
    let range = DateRange::resolve(params.start_date.as_deref(), params.end_date.as_deref())?;
    let group_by = GroupBy::parse(params.group_by.as_deref())?;
    let canonical = format!("{}&group_by={}", range.canonical(), group_by.as_str());

    analytics::cache_through(&state, "sentiment-trends", &canonical, || async {
        queries::sentiment_trends(&state.pool, &range, group_by).await
    })
    .await
}

async fn volume_trends(
    State(state): State<AppState>,
    Query(params): Query<TrendParams>,
) -> ApiResult<Response> {
    let range = DateRange::resolve(params.start_date.as_deref(), params.end_date.as_deref())?;
    let group_by = GroupBy::parse(params.group_by.as_deref())?;
    let canonical = format!("{}&group_by={}", range.canonical(), group_by.as_str());

    analytics::cache_through(&state, "volume-trends", &canonical, || async {
        queries::volume_trends(&state.pool, &range, group_by).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct DailyAggregateParams {
    page: Option<i64>,
    page_size: Option<i64>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn daily_aggregates(
    State(state): State<AppState>,
    Query(params): Query<DailyAggregateParams>,
) -> ApiResult<Response> {
    // Browsing the rollup table is unbounded by default; pagination caps
    // the page instead (365 days max per page).
    let paging = pagination::sanitize(params.page, params.page_size, 30, 365);
    let start = params.start_date.clone();
    let end = params.end_date.clone();
    let canonical = format!(
        "end={}&page={}&page_size={}&start={}",
        end.as_deref().unwrap_or(""),
        paging.page,
        paging.page_size,
        start.as_deref().unwrap_or(""),
    );

    analytics::cache_through(&state, "daily-aggregates", &canonical, || async {
        let (items, total) = aggregates::read_page(
            &state.pool,
            start.as_deref(),
            end.as_deref(),
            paging.page_size,
            paging.offset,
        )
        .await?;
        Ok(Page::new(items, total, paging))
    })
    .await
}

#[derive(Debug, Deserialize)]
struct CustomerParams {
    min_feedback_count: Option<i64>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn customers(
    State(state): State<AppState>,
    Query(params): Query<CustomerParams>,
) -> ApiResult<Response> {
    let range = DateRange::resolve(params.start_date.as_deref(), params.end_date.as_deref())?;
    let min_count = params.min_feedback_count.unwrap_or(1).max(1);
    let canonical = format!("{}&min_feedback_count={}", range.canonical(), min_count);

    analytics::cache_through(&state, "customers", &canonical, || async {
        queries::customer_stats(&state.pool, &range, min_count).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start_date: Option<String>,
    end_date: Option<String>,
    // The summary endpoint accepts `start`/`end` as well
    start: Option<String>,
    end: Option<String>,
}

impl RangeParams {
    fn resolve(&self) -> ApiResult<DateRange> {
        DateRange::resolve(
            self.start_date.as_deref().or(self.start.as_deref()),
            self.end_date.as_deref().or(self.end.as_deref()),
        )
    }
}

async fn sources(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Response> {
    let range = params.resolve()?;

    analytics::cache_through(&state, "sources", &range.canonical(), || async {
        queries::source_stats(&state.pool, &range).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct ToxicityParams {
    threshold: Option<f64>,
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn toxicity(
    State(state): State<AppState>,
    Query(params): Query<ToxicityParams>,
) -> ApiResult<Response> {
    let threshold = params.threshold.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(crate::error::ApiError::validation(
            "threshold must be between 0.0 and 1.0",
        ));
    }
    let range = DateRange::resolve(params.start_date.as_deref(), params.end_date.as_deref())?;
    let canonical = format!("{}&threshold={threshold}", range.canonical());

    analytics::cache_through(&state, "toxicity", &canonical, || async {
        queries::toxicity_stats(&state.pool, &range, threshold).await
    })
    .await
}

async fn summary(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Response> {
    let range = params.resolve()?;

    analytics::cache_through(&state, "summary", &range.canonical(), || async {
        queries::summary(&state.pool, &range).await
    })
    .await
}

async fn topics(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Response> {
    let range = params.resolve()?;

    analytics::cache_through(&state, "topics", &range.canonical(), || async {
        queries::topics(&state.pool, &range).await
    })
    .await
}

#[derive(Debug, Deserialize)]
struct ExampleParams {
    topic_id: Option<i64>,
    sentiment: Option<i64>,
    limit: Option<i64>,
}

async fn examples(
    State(state): State<AppState>,
    Query(params): Query<ExampleParams>,
) -> ApiResult<Response> {
    let limit = params.limit.unwrap_or(10);
    let canonical = format!(
        "limit={}&sentiment={}&topic_id={}",
        limit.clamp(1, 50),
        params.sentiment.map(|s| s.to_string()).unwrap_or_default(),
        params.topic_id.map(|t| t.to_string()).unwrap_or_default(),
    );

    analytics::cache_through(&state, "examples", &canonical, || async {
        queries::examples(&state.pool, params.topic_id, params.sentiment, limit).await
    })
    .await
}

async fn dashboard_summary(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Response> {
    let range = params.resolve()?;

    analytics::cache_through(&state, "dashboard-summary", &range.canonical(), || async {
        queries::dashboard_summary(&state.pool, &range).await
    })
    .await
}
