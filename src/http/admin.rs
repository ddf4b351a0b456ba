//! Administrative endpoints for inspecting and resetting counters.
//!
//! This router carries no authentication of its own. It is served on the
//! admin address, which should only be reachable by operators.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::identity::normalize_path;
use crate::ratelimit::{MemoryStats, Permission, RateLimiter};

/// Query for `GET /rate-limits/stats`.
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Store key, e.g. `user:42` or `auth-login:ip:203.0.113.1`
    pub key: String,
    /// Method used to resolve the limit
    pub method: Option<String>,
    /// Path used to resolve the limit
    pub path: Option<String>,
    /// Comma-separated permission tags held by an API key
    pub permissions: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub key: String,
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub window_ms: u64,
    pub reset_after_ms: u64,
    pub reset_epoch_secs: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub key: Option<String>,
    pub existed: bool,
}

/// Build the admin router.
pub fn router(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rate-limits/memory", get(memory_stats))
        .route("/rate-limits/stats", get(key_stats))
        .route("/rate-limits", delete(reset_all))
        .route("/rate-limits/{key}", delete(reset_key))
        .with_state(limiter)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn memory_stats(State(limiter): State<Arc<RateLimiter>>) -> Json<MemoryStats> {
    Json(limiter.memory_stats())
}

async fn key_stats(
    State(limiter): State<Arc<RateLimiter>>,
    Query(query): Query<StatsQuery>,
) -> Json<StatsResponse> {
    let permissions = query
        .permissions
        .as_deref()
        .map(|tags| Permission::parse_tags(tags.split(',').map(str::trim)))
        .unwrap_or_default();
    let path = query.path.as_deref().map(normalize_path);
    let (config, decision) = limiter.stats(
        &query.key,
        query.method.as_deref(),
        path.as_deref(),
        &permissions,
    );
    Json(StatsResponse {
        reset_epoch_secs: decision.reset_epoch_secs(),
        key: query.key,
        allowed: decision.allowed,
        limit: decision.limit,
        remaining: decision.remaining,
        window_ms: config.window_ms(),
        reset_after_ms: decision.reset_after.as_millis() as u64,
    })
}

async fn reset_key(
    State(limiter): State<Arc<RateLimiter>>,
    Path(key): Path<String>,
) -> Json<ResetResponse> {
    let existed = limiter.reset(&key);
    info!(key = %key, existed, "Admin reset rate limit counter");
    Json(ResetResponse {
        key: Some(key),
        existed,
    })
}

async fn reset_all(State(limiter): State<Arc<RateLimiter>>) -> Json<ResetResponse> {
    let existed = !limiter.store().is_empty();
    limiter.reset_all();
    Json(ResetResponse { key: None, existed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Caller, CounterStore, LimitResolver, LimitsConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn limiter(max_entries: usize) -> Arc<RateLimiter> {
        let store = Arc::new(CounterStore::new(max_entries, Duration::from_secs(3600)));
        let resolver = LimitResolver::from_config(&LimitsConfig::default()).unwrap();
        Arc::new(RateLimiter::new(store, resolver))
    }

    async fn call(limiter: &Arc<RateLimiter>, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(Arc::clone(limiter))
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_stats_for_key() {
        let limiter = limiter(100);
        let caller = Caller::session("u1");
        limiter.check("GET", "/projects", &caller);
        limiter.check("GET", "/projects", &caller);

        let (status, body) = call(&limiter, Method::GET, "/rate-limits/stats?key=user:u1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["limit"], 100);
        assert_eq!(body["remaining"], 98);
        assert_eq!(body["allowed"], true);

        // Reading stats never consumes a slot.
        let (_, body) = call(&limiter, Method::GET, "/rate-limits/stats?key=user:u1").await;
        assert_eq!(body["remaining"], 98);
    }

    #[tokio::test]
    async fn test_stats_for_api_key_permissions() {
        let limiter = limiter(100);
        let caller = Caller::api_key("k7", vec![Permission::TransformsCreate]);
        limiter.check("GET", "/projects", &caller);

        let (_, body) = call(
            &limiter,
            Method::GET,
            "/rate-limits/stats?key=apikey:k7&permissions=transforms:create,%20files:teleport",
        )
        .await;
        assert_eq!(body["limit"], 10);
        assert_eq!(body["remaining"], 9);
    }

    #[tokio::test]
    async fn test_stats_with_route() {
        let limiter = limiter(100);
        let (status, body) = call(
            &limiter,
            Method::GET,
            "/rate-limits/stats?key=auth-login:ip:1.2.3.4&method=POST&path=/auth/login",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["limit"], 10);
        assert_eq!(body["window_ms"], 900_000);
    }

    #[tokio::test]
    async fn test_stats_requires_key() {
        let limiter = limiter(100);
        let (status, _) = call(&limiter, Method::GET, "/rate-limits/stats").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reset_key_and_all() {
        let limiter = limiter(100);
        limiter.check("GET", "/projects", &Caller::anonymous("10.0.0.1"));
        limiter.check("GET", "/projects", &Caller::anonymous("10.0.0.2"));

        let (status, body) = call(&limiter, Method::DELETE, "/rate-limits/ip:10.0.0.1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["existed"], true);

        let (_, body) = call(&limiter, Method::DELETE, "/rate-limits/ip:10.0.0.1").await;
        assert_eq!(body["existed"], false);

        let (status, _) = call(&limiter, Method::DELETE, "/rate-limits").await;
        assert_eq!(status, StatusCode::OK);
        assert!(limiter.store().is_empty());
    }

    #[tokio::test]
    async fn test_memory_stats_health() {
        let limiter = limiter(10);
        for i in 0..9 {
            limiter.check("GET", "/projects", &Caller::anonymous(format!("10.0.0.{}", i)));
        }

        let (status, body) = call(&limiter, Method::GET, "/rate-limits/memory").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"], 9);
        assert_eq!(body["max_entries"], 10);
        assert_eq!(body["total_timestamps"], 9);
        assert_eq!(body["health_status"], "warning");
    }

    #[tokio::test]
    async fn test_health() {
        let limiter = limiter(10);
        let (status, body) = call(&limiter, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}
