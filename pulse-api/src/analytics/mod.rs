//! Analytics engine
//!
//! Parameter canonicalisation, the per-endpoint TTL table, and the
//! cache-through executor shared by every rollup endpoint. The flow for
//! each request: canonicalise params → stable key → cache read → on miss,
//! run the whitelisted query under the hard timeout → write through.

pub mod queries;

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::http::header;
use axum::response::Response;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use pulse_common::cache::Cache;
use pulse_common::Error;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

/// Default window when no dates are supplied: the trailing 14 days.
pub const DEFAULT_WINDOW_DAYS: i64 = 14;

/// Hard cap on analytics query execution.
const HARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Past this, the query is logged as slow.
const SOFT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cache TTLs per endpoint family.
pub fn ttl_for(endpoint: &str) -> Duration {
    match endpoint {
        // Recent summaries move fast
        "summary" | "dashboard-summary" => Duration::from_secs(60),
        // Historical rollups barely move
        "daily-aggregates" => Duration::from_secs(900),
        _ => Duration::from_secs(300),
    }
}

/// Inclusive date range with canonical `YYYY-MM-DD` bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Resolve optional raw parameters into a concrete range, defaulting
    /// to the trailing 14 days and rejecting malformed or inverted input.
    pub fn resolve(start: Option<&str>, end: Option<&str>) -> ApiResult<Self> {
        let today = Utc::now().date_naive();
        let parse = |raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                ApiError::validation(format!("Invalid date '{raw}', expected YYYY-MM-DD"))
            })
        };

        let end = match end {
            Some(raw) => parse(raw)?,
            None => today,
        };
        let start = match start {
            Some(raw) => parse(raw)?,
            None => end - ChronoDuration::days(DEFAULT_WINDOW_DAYS - 1),
        };

        if start > end {
            return Err(ApiError::validation("start_date is after end_date"));
        }
        Ok(Self { start, end })
    }

    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }

    /// Width in days, inclusive.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// The immediately preceding window of the same width.
    pub fn prior_window(&self) -> DateRange {
        let width = self.days();
        DateRange {
            start: self.start - ChronoDuration::days(width),
            end: self.start - ChronoDuration::days(1),
        }
    }

    /// Same end, but at most `days` wide.
    pub fn clamp_trailing_days(&self, days: i64) -> DateRange {
        let earliest = self.end - ChronoDuration::days(days - 1);
        DateRange {
            start: self.start.max(earliest),
            end: self.end,
        }
    }

    /// Canonical fragment for cache keys.
    pub fn canonical(&self) -> String {
        format!("end={}&start={}", self.end_str(), self.start_str())
    }
}

/// Time grouping for trend rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Day,
    Week,
    Month,
}

impl GroupBy {
    pub fn parse(raw: Option<&str>) -> ApiResult<Self> {
        match raw.unwrap_or("day") {
            "day" => Ok(GroupBy::Day),
            "week" => Ok(GroupBy::Week),
            "month" => Ok(GroupBy::Month),
            other => Err(ApiError::validation(format!(
                "group_by must be 'day', 'week', or 'month', got '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Day => "day",
            GroupBy::Week => "week",
            GroupBy::Month => "month",
        }
    }
}

fn json_response(body: Vec<u8>) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body))
        .unwrap_or_default()
}

/// Cache-through executor. Serves cached bytes verbatim so responses for
/// identical parameters are byte-identical within the TTL window; on a
/// miss, runs `compute` under the hard timeout and writes through.
pub async fn cache_through<T, F, Fut>(
    state: &AppState,
    endpoint: &str,
    canonical_params: &str,
    compute: F,
) -> ApiResult<Response>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let key = Cache::key(endpoint, canonical_params);

    if let Some(cached) = state.cache.get(&key).await {
        state
            .metrics
            .increment("analytics_cache_hits_total", &[("endpoint", endpoint)])
            .await;
        return Ok(json_response(cached));
    }
    state
        .metrics
        .increment("analytics_cache_misses_total", &[("endpoint", endpoint)])
        .await;

    let started = Instant::now();
    let value = tokio::time::timeout(HARD_TIMEOUT, compute())
        .await
        .map_err(|_| {
            ApiError(Error::Timeout(format!(
                "Analytics query '{endpoint}' exceeded {}s",
                HARD_TIMEOUT.as_secs()
            )))
        })??;

    if started.elapsed() > SOFT_TIMEOUT {
        tracing::warn!(
            endpoint,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Slow analytics query"
        );
    }

    let body = serde_json::to_vec(&value)
        .map_err(|e| ApiError(Error::Internal(format!("Response serialisation failed: {e}"))))?;
    state
        .cache
        .set_ttl(&key, body.clone(), ttl_for(endpoint))
        .await;

    Ok(json_response(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_defaults_to_trailing_14_days() {
        let range = DateRange::resolve(None, None).unwrap();
        assert_eq!(range.days(), DEFAULT_WINDOW_DAYS);
        assert_eq!(range.end, Utc::now().date_naive());
    }

    #[test]
    fn test_range_parses_explicit_bounds() {
        let range = DateRange::resolve(Some("2024-01-01"), Some("2024-01-31")).unwrap();
        assert_eq!(range.start_str(), "2024-01-01");
        assert_eq!(range.end_str(), "2024-01-31");
        assert_eq!(range.days(), 31);
    }

    #[test]
    fn test_range_rejects_bad_input() {
        assert!(DateRange::resolve(Some("01/01/2024"), None).is_err());
        assert!(DateRange::resolve(Some("2024-02-01"), Some("2024-01-01")).is_err());
    }

    #[test]
    fn test_prior_window_abuts_current() {
        let range = DateRange::resolve(Some("2024-01-08"), Some("2024-01-14")).unwrap();
        let prior = range.prior_window();
        assert_eq!(prior.start_str(), "2024-01-01");
        assert_eq!(prior.end_str(), "2024-01-07");
    }

    #[test]
    fn test_clamp_trailing_days() {
        let range = DateRange::resolve(Some("2024-01-01"), Some("2024-03-01")).unwrap();
        let clamped = range.clamp_trailing_days(14);
        assert_eq!(clamped.end, range.end);
        assert_eq!(clamped.days(), 14);

        let narrow = DateRange::resolve(Some("2024-02-28"), Some("2024-03-01")).unwrap();
        assert_eq!(narrow.clamp_trailing_days(14), narrow);
    }

    #[test]
    fn test_canonical_is_order_stable() {
        let a = DateRange::resolve(Some("2024-01-01"), Some("2024-01-14")).unwrap();
        assert_eq!(a.canonical(), "end=2024-01-14&start=2024-01-01");
    }

    #[test]
    fn test_group_by_parse() {
        assert_eq!(GroupBy::parse(None).unwrap(), GroupBy::Day);
        assert_eq!(GroupBy::parse(Some("week")).unwrap(), GroupBy::Week);
        assert!(GroupBy::parse(Some("hour")).is_err());
    }

    #[test]
    fn test_ttl_table() {
        assert_eq!(ttl_for("summary"), Duration::from_secs(60));
        assert_eq!(ttl_for("daily-aggregates"), Duration::from_secs(900));
        assert_eq!(ttl_for("sentiment-trends"), Duration::from_secs(300));
    }
}
