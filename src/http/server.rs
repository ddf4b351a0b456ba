//! HTTP server hosting the rate-limited API and the admin surface.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use super::admin;
use super::middleware::with_admission_control;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// Serves `routes` behind admission control, plus the admin router.
pub struct HttpServer {
    /// Public API address
    addr: SocketAddr,
    /// Admin API address
    admin_addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// The platform routes to protect
    routes: Router,
}

impl HttpServer {
    /// Create a new server.
    pub fn new(
        addr: SocketAddr,
        admin_addr: SocketAddr,
        rate_limiter: Arc<RateLimiter>,
        routes: Router,
    ) -> Self {
        Self {
            addr,
            admin_addr,
            rate_limiter,
            routes,
        }
    }

    /// Start both listeners and run until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let api = with_admission_control(self.routes, Arc::clone(&self.rate_limiter));
        let admin = admin::router(self.rate_limiter);

        let api_listener = TcpListener::bind(self.addr).await?;
        let admin_listener = TcpListener::bind(self.admin_addr).await?;

        info!(addr = %self.addr, "Starting HTTP API with admission control");
        info!(addr = %self.admin_addr, "Starting admin API");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let api_server = axum::serve(
            api_listener,
            api.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()))
        .into_future();

        let admin_server = axum::serve(admin_listener, admin)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
            .into_future();

        let trigger = async move {
            signal.await;
            let _ = shutdown_tx.send(true);
        };

        let (api_result, admin_result, ()) = tokio::join!(api_server, admin_server, trigger);

        if let Err(e) = &api_result {
            error!(error = %e, "HTTP API server failed");
        }
        if let Err(e) = &admin_result {
            error!(error = %e, "Admin server failed");
        }
        api_result?;
        admin_result?;
        Ok(())
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
