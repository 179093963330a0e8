//! API error mapping
//!
//! Single serialisation point for errors: every handler returns
//! `ApiResult<T>` and the taxonomy maps onto HTTP statuses here. Bodies
//! are `{"detail": ...}`; 5xx responses carry a correlation id that also
//! lands in the structured log.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pulse_common::Error;
use serde_json::json;
use uuid::Uuid;

/// Error wrapper for the HTTP layer.
#[derive(Debug)]
pub struct ApiError(pub Error);

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError(Error::Database(err))
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError(Error::Validation(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError(Error::NotFound(msg.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::AuthMissing(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Error::AuthInsufficient(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::TooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            Error::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "detail": "Too many requests. Please try again later." })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                return response;
            }
            Error::Timeout(msg) => (StatusCode::REQUEST_TIMEOUT, msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Error::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Error::Database(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        if status.is_server_error() {
            let correlation_id = Uuid::new_v4();
            tracing::error!(
                correlation_id = %correlation_id,
                status = status.as_u16(),
                detail = %detail,
                "Request failed"
            );
            return (
                status,
                Json(json!({
                    "detail": "Internal server error",
                    "correlation_id": correlation_id.to_string(),
                })),
            )
                .into_response();
        }

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::AuthMissing("x".into()), StatusCode::UNAUTHORIZED),
            (Error::AuthInsufficient("x".into()), StatusCode::FORBIDDEN),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::TooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (Error::Timeout("x".into()), StatusCode::REQUEST_TIMEOUT),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (Error::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError(Error::RateLimited { retry_after_secs: 7 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("7")
        );
    }
}
