//! Caller identification for inbound requests.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;

use crate::ratelimit::{Caller, CallerKey, CallerScope, Permission};

/// Identity attached to a request by the platform's auth layer.
///
/// Inserted as a request extension before the admission middleware runs.
/// Requests without it are treated as anonymous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Id of the session user
    pub user_id: Option<String>,
    /// Id of the API key used
    pub api_key_id: Option<String>,
    /// Permission tags stored with the API key
    pub permission_tags: Vec<String>,
}

impl CallerIdentity {
    /// A JWT session.
    pub fn session(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// An API key and its stored permission tags.
    pub fn api_key<I, S>(key_id: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            api_key_id: Some(key_id.into()),
            permission_tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Resolve the caller, falling back to `address` when nothing is set.
    ///
    /// Session callers hold the wildcard permission. Tags this build does not
    /// recognise are dropped.
    pub fn to_caller(&self, address: &str) -> Caller {
        let key = CallerKey::derive(self.user_id.as_deref(), self.api_key_id.as_deref(), address);
        match key.scope {
            CallerScope::User => Caller {
                key,
                permissions: vec![Permission::Wildcard],
                authenticated: true,
            },
            CallerScope::ApiKey => Caller {
                key,
                permissions: Permission::parse_tags(self.permission_tags.iter().map(String::as_str)),
                authenticated: true,
            },
            CallerScope::Ip => Caller::anonymous(key.id),
        }
    }
}

/// The caller of `request`.
pub fn caller_for_request(request: &Request) -> Caller {
    let address = client_ip(request.headers(), request.extensions().get::<ConnectInfo<SocketAddr>>());
    match request.extensions().get::<CallerIdentity>() {
        Some(identity) => identity.to_caller(&address),
        None => Caller::anonymous(address),
    }
}

/// Client address: `x-real-ip`, then the first `x-forwarded-for` hop, then the socket.
pub fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    header("x-real-ip")
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|list| list.split(',').map(str::trim).find(|ip| !ip.is_empty()))
        })
        .map(str::to_string)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Normalize a request path for pattern matching.
///
/// Drops any query string, collapses repeated slashes and removes a trailing
/// slash except on the root.
pub fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}
