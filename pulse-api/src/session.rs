//! Bearer session extraction and role gating
//!
//! Handlers declare the access level they need by taking `AuthSession`
//! (any valid token) or `AdminSession` (admin role) as an argument; the
//! extractors verify the token against the configured signing secret and
//! capture the caller's address and agent string for the audit log.

use crate::error::ApiError;
use crate::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use pulse_common::auth::{verify_token, Claims, Role};
use pulse_common::Error;

/// A validated bearer session plus request metadata.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub claims: Claims,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub(crate) fn client_ip(parts: &Parts) -> Option<String> {
    if let Some(forwarded) = parts.headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                return Some(first.trim().to_string());
            }
        }
    }
    parts
        .headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(Error::AuthMissing("Missing Authorization header".into())))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError(Error::AuthMissing("Expected a bearer token".into())))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = verify_token(token, &state.settings.security.secret_key)?;

        Ok(AuthSession {
            claims,
            ip_address: client_ip(parts),
            user_agent: parts
                .headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
        })
    }
}

/// A session whose role allows mutations.
#[derive(Debug, Clone)]
pub struct AdminSession(pub AuthSession);

#[async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = AuthSession::from_request_parts(parts, state).await?;
        if session.claims.role != Role::Admin {
            return Err(ApiError(Error::AuthInsufficient(
                "Admin role required".into(),
            )));
        }
        Ok(AdminSession(session))
    }
}
