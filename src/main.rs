use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bucketgate::config::ServiceConfig;
use bucketgate::http::HttpServer;
use bucketgate::ratelimit::{CleanupTask, CounterStore, LimitResolver, LimitsConfig, RateLimiter};

#[derive(Parser, Debug)]
#[command(name = "bucketgate")]
#[command(about = "Sliding-window admission control for the file platform API")]
#[command(version)]
struct Args {
    /// Service configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Rate limit rules file, overrides `rate_limiting.config_path`
    #[arg(short, long)]
    limits: Option<String>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Bucketgate admission control");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if args.limits.is_some() {
        config.rate_limiting.config_path = args.limits;
    }
    info!(
        http_addr = %config.server.http_addr,
        admin_addr = %config.server.admin_addr,
        max_entries = config.store.max_entries,
        "Configuration loaded"
    );

    let limits = match &config.rate_limiting.config_path {
        Some(path) => LimitsConfig::from_file(path)?,
        None => LimitsConfig::default(),
    };
    let resolver = LimitResolver::from_config(&limits)?;

    // Initialize the counter store and its sweeper
    let store = Arc::new(CounterStore::from_config(&config.store));
    let cleanup = CleanupTask::spawn(Arc::clone(&store), config.store.cleanup_interval());

    let rate_limiter = Arc::new(RateLimiter::new(store, resolver));
    info!(
        endpoints = limits.endpoints.len(),
        tiers = limits.tiers.len(),
        "Rate limiter initialized"
    );

    let reload = match (&config.rate_limiting.config_path, config.rate_limiting.config_reload_interval_secs) {
        (Some(path), secs) if secs > 0 => Some(tokio::spawn(watch_rules(
            Arc::clone(&rate_limiter),
            PathBuf::from(path),
            Duration::from_secs(secs),
        ))),
        _ => None,
    };

    let routes = Router::new()
        .route("/health", get(health))
        .fallback(not_found);

    let server = HttpServer::new(
        config.server.http_addr,
        config.server.admin_addr,
        rate_limiter,
        routes,
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(reload) = reload {
        reload.abort();
    }
    cleanup.shutdown().await;

    info!("Bucketgate stopped");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not_found" })),
    )
}

/// Reload the rules file whenever its modification time changes.
async fn watch_rules(limiter: Arc<RateLimiter>, path: PathBuf, interval: Duration) {
    let modified = |path: &PathBuf| -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    };

    let mut last_seen = modified(&path);
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let current = modified(&path);
        if current.is_none() || current == last_seen {
            continue;
        }
        last_seen = current;

        if let Err(e) = limiter.reload_rules(&path) {
            warn!(path = %path.display(), error = %e, "Keeping previous rate limit rules");
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
