//! Admission control middleware.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tracing::{instrument, warn};

use super::identity::{caller_for_request, normalize_path};
use super::response::{apply_rate_limit_headers, rejection};
use crate::ratelimit::RateLimiter;

/// Check every request against the rate limiter before it reaches `next`.
///
/// Admitted responses carry the `X-RateLimit-*` headers. Denied requests are
/// answered with 429 and never reach the inner service.
#[instrument(
    skip(limiter, request, next),
    fields(method = %request.method(), path = %request.uri().path())
)]
pub async fn admission_control(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let caller = caller_for_request(&request);
    let path = normalize_path(request.uri().path());
    let admission = limiter.check(request.method().as_str(), &path, &caller);

    if !admission.decision.allowed {
        warn!(
            key = %admission.key,
            retry_after_secs = ?admission.decision.retry_after_secs,
            "Request rejected by rate limiter"
        );
        return rejection(&admission.decision);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &admission.decision);
    response
}

/// Wrap `routes`, including the fallback, in admission control.
pub fn with_admission_control(routes: Router, limiter: Arc<RateLimiter>) -> Router {
    routes.layer(middleware::from_fn_with_state(limiter, admission_control))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::identity::CallerIdentity;
    use crate::http::response::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
    use crate::ratelimit::{CounterStore, LimitResolver, LimitsConfig, DEFAULT_STALE_AFTER};
    use axum::body::{to_bytes, Body};
    use axum::http::header::RETRY_AFTER;
    use axum::http::{Method, StatusCode};
    use axum::routing::{get, post};
    use tower::ServiceExt;

    fn limiter() -> Arc<RateLimiter> {
        let store = Arc::new(CounterStore::new(1000, DEFAULT_STALE_AFTER));
        let resolver = LimitResolver::from_config(&LimitsConfig::default()).unwrap();
        Arc::new(RateLimiter::new(store, resolver))
    }

    fn app(limiter: Arc<RateLimiter>) -> Router {
        let routes = Router::new()
            .route("/projects", get(|| async { "projects" }))
            .route("/auth/login", post(|| async { "token" }))
            .fallback(|| async { StatusCode::NOT_FOUND });
        with_admission_control(routes, limiter)
    }

    fn request(method: Method, uri: &str, ip: &str) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("x-real-ip", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_admitted_response_has_headers() {
        let app = app(limiter());

        let response = app
            .oneshot(request(Method::GET, "/projects", "203.0.113.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "100");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "99");
        let reset: i64 = response.headers()[X_RATELIMIT_RESET].to_str().unwrap().parse().unwrap();
        assert!(reset > chrono::Utc::now().timestamp());
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn test_login_is_rejected_after_ten_attempts() {
        let limiter = limiter();

        for _ in 0..10 {
            let response = app(Arc::clone(&limiter))
                .oneshot(request(Method::POST, "/auth/login?next=/", "198.51.100.20"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app(Arc::clone(&limiter))
            .oneshot(request(Method::POST, "/auth/login", "198.51.100.20"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");
        let retry_after: u32 = response.headers()[RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=900).contains(&retry_after));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "too_many_requests");
        assert_eq!(body["retry_after_seconds"], retry_after);

        // Another address still gets through.
        let response = app(limiter)
            .oneshot(request(Method::POST, "/auth/login", "198.51.100.21"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_identity_extension_selects_tier() {
        let mut req = request(Method::GET, "/projects", "203.0.113.5");
        req.extensions_mut()
            .insert(CallerIdentity::api_key("k-42", ["transforms:create"]));

        let response = app(limiter()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "10");
    }

    #[tokio::test]
    async fn test_fallback_is_counted() {
        let limiter = limiter();
        let response = app(Arc::clone(&limiter))
            .oneshot(request(Method::GET, "/nowhere", "203.0.113.8"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(limiter.store().contains("ip:203.0.113.8"));
    }
}
