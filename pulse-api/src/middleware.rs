//! HTTP middleware: request tracing and rate limiting
//!
//! Chain, outer to inner: request-id + timing → CORS (tower-http layer
//! assembled in the router) → rate limiting → routing. Role gating
//! happens at the route via the session extractors.

use crate::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use pulse_common::auth::verify_token;
use pulse_common::config::RateLimitSettings;
use pulse_common::Error;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Request-scoped tracing: assign a request id, time the request, log on
/// completion, and echo the id back to the caller.
pub async fn request_tracing(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = status.as_u16(),
        elapsed_ms,
        "Request completed"
    );

    state
        .metrics
        .increment(
            "http_requests_total",
            &[
                ("method", method.as_str()),
                ("status", status.as_str()),
            ],
        )
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Rate limit tiers, each with its own per-minute budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    General,
    Analytics,
    Admin,
    Upload,
}

impl Tier {
    pub fn for_path(path: &str) -> Tier {
        if path.starts_with("/ingest/upload") {
            Tier::Upload
        } else if path.starts_with("/admin") {
            Tier::Admin
        } else if path.starts_with("/analytics") || path.starts_with("/api/") {
            Tier::Analytics
        } else {
            Tier::General
        }
    }

    fn per_minute(&self, settings: &RateLimitSettings) -> u32 {
        match self {
            Tier::General => settings.general_per_minute,
            Tier::Analytics => settings.analytics_per_minute,
            Tier::Admin => settings.admin_per_minute,
            Tier::Upload => settings.upload_per_minute,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Outcome of one admission check.
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

/// In-process token bucket keyed by (tier, subject-or-IP). State is
/// process-local; replicas each carry their own budget.
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: Mutex<HashMap<(Tier, String), Bucket>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check(&self, tier: Tier, key: &str) -> Admission {
        let limit = tier.per_minute(&self.settings);
        let capacity = self.settings.burst_limit as f64;
        let refill_per_sec = limit as f64 / 60.0;
        let now = Instant::now();

        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry((tier, key.to_string())).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Admission {
                allowed: true,
                limit,
                remaining: bucket.tokens as u32,
                retry_after_secs: 0,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after = (deficit / refill_per_sec).ceil() as u64;
            Admission {
                allowed: false,
                limit,
                remaining: 0,
                retry_after_secs: retry_after.max(1),
            }
        }
    }
}

fn limiter_key(state: &AppState, request: &Request) -> String {
    // Authenticated subject when a valid token is present, client IP
    // otherwise.
    if let Some(auth) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if let Ok(claims) = verify_token(auth, &state.settings.security.secret_key) {
            return format!("sub:{}", claims.sub);
        }
    }

    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());
    format!("ip:{ip}")
}

/// Rate limiting middleware. Adds `X-RateLimit-*` headers to admitted
/// responses and answers 429 with `Retry-After` on exhaustion.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !state.settings.rate_limit.enabled {
        return next.run(request).await;
    }

    let tier = Tier::for_path(path);
    let key = limiter_key(&state, &request);
    let admission = state.limiter.check(tier, &key).await;

    let mut response = if admission.allowed {
        next.run(request).await
    } else {
        state.metrics.increment("rate_limited_total", &[]).await;
        crate::error::ApiError(Error::RateLimited {
            retry_after_secs: admission.retry_after_secs,
        })
        .into_response()
    };

    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&admission.limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&admission.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&(Utc::now().timestamp() + 60).to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RateLimitSettings {
        RateLimitSettings {
            enabled: true,
            general_per_minute: 60,
            analytics_per_minute: 30,
            admin_per_minute: 10,
            upload_per_minute: 5,
            burst_limit: 3,
        }
    }

    #[tokio::test]
    async fn test_burst_then_deny() {
        let limiter = RateLimiter::new(settings());
        for _ in 0..3 {
            assert!(limiter.check(Tier::General, "ip:1.2.3.4").await.allowed);
        }
        let denied = limiter.check(Tier::General, "ip:1.2.3.4").await;
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs >= 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(settings());
        for _ in 0..3 {
            assert!(limiter.check(Tier::General, "ip:1.1.1.1").await.allowed);
        }
        assert!(limiter.check(Tier::General, "ip:2.2.2.2").await.allowed);
    }

    #[tokio::test]
    async fn test_tiers_are_independent() {
        let limiter = RateLimiter::new(settings());
        for _ in 0..3 {
            assert!(limiter.check(Tier::Upload, "ip:1.1.1.1").await.allowed);
        }
        assert!(!limiter.check(Tier::Upload, "ip:1.1.1.1").await.allowed);
        assert!(limiter.check(Tier::General, "ip:1.1.1.1").await.allowed);
    }

    #[test]
    fn test_tier_for_path() {
        assert_eq!(Tier::for_path("/ingest/upload/csv"), Tier::Upload);
        assert_eq!(Tier::for_path("/admin/stats"), Tier::Admin);
        assert_eq!(Tier::for_path("/analytics/summary"), Tier::Analytics);
        assert_eq!(Tier::for_path("/api/export/export.csv"), Tier::Analytics);
        assert_eq!(Tier::for_path("/ingest/feedback"), Tier::General);
        assert_eq!(Tier::for_path("/chat/query"), Tier::General);
    }
}
