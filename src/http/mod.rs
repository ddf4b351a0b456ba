//! HTTP integration: caller identification, admission middleware and admin routes.

pub mod admin;
mod identity;
mod middleware;
mod response;
mod server;

pub use identity::{caller_for_request, client_ip, normalize_path, CallerIdentity};
pub use middleware::{admission_control, with_admission_control};
pub use response::{
    apply_rate_limit_headers, rejection, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use server::HttpServer;
