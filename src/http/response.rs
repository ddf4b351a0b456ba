//! Mapping of rate limit decisions onto HTTP responses.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::error::BucketgateError;
use crate::ratelimit::Decision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u32>,
}

impl IntoResponse for BucketgateError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            BucketgateError::TooManyRequests { retry_after_secs } => {
                let body = ErrorBody {
                    error: "too_many_requests",
                    message,
                    retry_after_seconds: Some(retry_after_secs),
                };
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            _ => {
                error!(error = %message, "Request failed");
                let body = ErrorBody {
                    error: "internal_error",
                    message: "internal server error".to_string(),
                    retry_after_seconds: None,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

/// Write the `X-RateLimit-*` headers, and `Retry-After` when denied.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_epoch_secs()));
    if let Some(retry_after) = decision.retry_after_secs {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

/// The 429 response for a denied decision.
pub fn rejection(decision: &Decision) -> Response {
    let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
    let mut response = BucketgateError::TooManyRequests { retry_after_secs }.into_response();
    apply_rate_limit_headers(response.headers_mut(), decision);
    response
}
