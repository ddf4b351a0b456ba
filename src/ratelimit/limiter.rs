//! Core rate limiter implementation.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, trace};

use super::caller::{Caller, CallerKey};
use super::counter::Decision;
use super::permission::Permission;
use super::resolver::LimitResolver;
use super::rules::{LimitConfig, LimitsConfig};
use super::store::{CounterStore, MemoryStats};
use crate::error::Result;

/// The outcome of admitting one request.
#[derive(Debug, Clone)]
pub struct Admission {
    /// The store key the request was counted against
    pub key: String,
    /// The decision for that key
    pub decision: Decision,
}

/// Resolves the limit for a request and checks it against the counter store.
///
/// This struct is thread-safe and is shared across request handlers behind an
/// `Arc`. The resolver can be swapped at runtime when rules are reloaded;
/// counters are kept across swaps.
pub struct RateLimiter {
    store: Arc<CounterStore>,
    resolver: RwLock<Arc<LimitResolver>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(store: Arc<CounterStore>, resolver: LimitResolver) -> Self {
        Self {
            store,
            resolver: RwLock::new(Arc::new(resolver)),
        }
    }

    /// Admit or reject one request.
    pub fn check(&self, method: &str, path: &str, caller: &Caller) -> Admission {
        let resolver = self.resolver();
        let config = resolver.resolve_config(
            method,
            path,
            &caller.permissions,
            caller.authenticated,
        );
        let key = caller.key.to_store_key(config.key_prefix.as_deref());

        trace!(
            key = %key,
            method = %method,
            path = %path,
            limit = config.max_requests,
            window_ms = config.window_ms(),
            "Checking rate limit"
        );

        let decision = self.store.check(&key, config);
        if !decision.allowed {
            debug!(
                key = %key,
                method = %method,
                path = %path,
                retry_after_secs = ?decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }

        Admission { key, decision }
    }

    /// Inspect a stored key without consuming a slot.
    ///
    /// The caller is recovered from the key's scope: `user` keys resolve with
    /// the session wildcard, `apikey` keys with `permissions`, and `ip` keys
    /// as anonymous. The route is only consulted when both `method` and
    /// `path` are given.
    pub fn stats(
        &self,
        key: &str,
        method: Option<&str>,
        path: Option<&str>,
        permissions: &[Permission],
    ) -> (LimitConfig, Decision) {
        let resolver = self.resolver();
        let caller = CallerKey::from_store_key(key)
            .map(|caller_key| Caller::from_key(caller_key, permissions.to_vec()));
        let (permissions, authenticated) = match &caller {
            Some(caller) => (caller.permissions.as_slice(), caller.authenticated),
            None => (permissions, true),
        };

        let config = match (method, path) {
            (Some(method), Some(path)) => {
                resolver.resolve_config(method, path, permissions, authenticated)
            }
            _ => resolver.resolve_unrouted(permissions, authenticated),
        };
        let decision = self.store.get_stats(key, config);
        (config.clone(), decision)
    }

    /// Forget one key's counter.
    pub fn reset(&self, key: &str) -> bool {
        self.store.reset(key)
    }

    /// Forget every counter.
    pub fn reset_all(&self) {
        self.store.reset_all()
    }

    /// Memory usage of the counter store.
    pub fn memory_stats(&self) -> MemoryStats {
        self.store.memory_stats()
    }

    /// The counter store.
    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    /// The resolver currently in use.
    pub fn resolver(&self) -> Arc<LimitResolver> {
        Arc::clone(&self.resolver.read())
    }

    /// Replace the resolver.
    pub fn set_resolver(&self, resolver: LimitResolver) {
        *self.resolver.write() = Arc::new(resolver);
    }

    /// Reload rules from a YAML file. The current resolver is kept on error.
    pub fn reload_rules<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = LimitsConfig::from_file(path.as_ref())?;
        let resolver = LimitResolver::from_config(&config)?;
        self.set_resolver(resolver);
        info!(
            path = %path.as_ref().display(),
            endpoints = config.endpoints.len(),
            tiers = config.tiers.len(),
            "Rate limit rules reloaded"
        );
        Ok(())
    }
}
