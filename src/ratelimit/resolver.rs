//! Limit resolution.
//!
//! Picks the [`LimitConfig`] that governs a request. Sources are consulted
//! in order and the first match wins:
//!
//! 1. an endpoint override for the request's method and path,
//! 2. the most restrictive tier among the caller's permissions,
//! 3. the authenticated or unauthenticated default.

use std::collections::HashMap;
use tracing::trace;

use super::pattern::EndpointPattern;
use super::permission::{Permission, Tier};
use super::rules::{LimitConfig, LimitsConfig};
use crate::error::Result;

/// A limit bound to a method and path pattern.
#[derive(Debug, Clone)]
struct EndpointOverride {
    method: String,
    pattern: EndpointPattern,
    config: LimitConfig,
}

impl EndpointOverride {
    fn matches_method(&self, method: &str) -> bool {
        self.method == "*" || self.method.eq_ignore_ascii_case(method)
    }
}

/// Resolves the limit for a request from static registration tables.
#[derive(Debug, Clone)]
pub struct LimitResolver {
    literal_overrides: Vec<EndpointOverride>,
    pattern_overrides: Vec<EndpointOverride>,
    tiers: HashMap<Tier, LimitConfig>,
    permission_tiers: HashMap<Permission, Tier>,
    authenticated_default: LimitConfig,
    unauthenticated_default: LimitConfig,
}

impl LimitResolver {
    /// Start building a resolver around the two default limits.
    pub fn builder(
        authenticated_default: LimitConfig,
        unauthenticated_default: LimitConfig,
    ) -> ResolverBuilder {
        ResolverBuilder {
            resolver: LimitResolver {
                literal_overrides: Vec::new(),
                pattern_overrides: Vec::new(),
                tiers: HashMap::new(),
                permission_tiers: HashMap::new(),
                authenticated_default,
                unauthenticated_default,
            },
        }
    }

    /// Build a resolver from rule tables, validating every rule.
    pub fn from_config(config: &LimitsConfig) -> Result<Self> {
        let mut builder = Self::builder(
            config.defaults.authenticated.to_limit_config()?,
            config.defaults.unauthenticated.to_limit_config()?,
        );

        for (tier, rule) in &config.tiers {
            builder = builder.tier(*tier, rule.to_limit_config()?);
        }
        for (permission, tier) in &config.permissions {
            builder = builder.permission(*permission, *tier);
        }
        for endpoint in &config.endpoints {
            builder = builder.endpoint(
                &endpoint.method,
                &endpoint.path,
                endpoint.rate_limit.to_limit_config()?,
            )?;
        }

        Ok(builder.build())
    }

    /// Select the limit governing a request.
    pub fn resolve_config(
        &self,
        method: &str,
        path: &str,
        permissions: &[Permission],
        is_authenticated: bool,
    ) -> &LimitConfig {
        if let Some(endpoint) = self.find_endpoint_override(method, path) {
            trace!(
                method = %method,
                path = %path,
                pattern = %endpoint.pattern,
                "Resolved endpoint override"
            );
            return &endpoint.config;
        }

        self.resolve_unrouted(permissions, is_authenticated)
    }

    /// Select the limit for a caller when no endpoint override applies.
    pub fn resolve_unrouted(&self, permissions: &[Permission], is_authenticated: bool) -> &LimitConfig {
        if let Some(config) = self.tier_for_permissions(permissions) {
            trace!(
                max_requests = config.max_requests,
                window_ms = config.window_ms(),
                "Resolved permission tier"
            );
            return config;
        }

        self.default_config(is_authenticated)
    }

    /// The most restrictive of `configs`, or the authenticated default when empty.
    pub fn most_restrictive<'a, I>(&'a self, configs: I) -> &'a LimitConfig
    where
        I: IntoIterator<Item = &'a LimitConfig>,
    {
        pick_most_restrictive(configs).unwrap_or(&self.authenticated_default)
    }

    /// The default for an authenticated or anonymous caller.
    pub fn default_config(&self, is_authenticated: bool) -> &LimitConfig {
        if is_authenticated {
            &self.authenticated_default
        } else {
            &self.unauthenticated_default
        }
    }

    /// The limit registered for a tier.
    pub fn tier_config(&self, tier: Tier) -> Option<&LimitConfig> {
        self.tiers.get(&tier)
    }

    fn find_endpoint_override(&self, method: &str, path: &str) -> Option<&EndpointOverride> {
        self.literal_overrides
            .iter()
            .find(|o| o.matches_method(method) && o.pattern.as_str() == path)
            .or_else(|| {
                self.pattern_overrides
                    .iter()
                    .find(|o| o.matches_method(method) && o.pattern.matches(path))
            })
    }

    fn tier_for_permissions(&self, permissions: &[Permission]) -> Option<&LimitConfig> {
        if permissions.contains(&Permission::Wildcard) {
            return self.tiers.get(&Tier::Standard);
        }

        // Permissions without a registered tier are skipped, not treated as unlimited.
        let candidates = permissions.iter().filter_map(|permission| {
            self.permission_tiers
                .get(permission)
                .and_then(|tier| self.tiers.get(tier))
        });
        pick_most_restrictive(candidates)
    }
}

/// Smallest `max_requests / window` ratio; ties keep the earliest.
fn pick_most_restrictive<'a, I>(configs: I) -> Option<&'a LimitConfig>
where
    I: IntoIterator<Item = &'a LimitConfig>,
{
    configs.into_iter().fold(None, |best, candidate| match best {
        Some(current) if !candidate.is_more_restrictive_than(current) => Some(current),
        _ => Some(candidate),
    })
}

/// Builder for [`LimitResolver`].
#[derive(Debug)]
pub struct ResolverBuilder {
    resolver: LimitResolver,
}

impl ResolverBuilder {
    /// Register the limit for a tier.
    pub fn tier(mut self, tier: Tier, config: LimitConfig) -> Self {
        self.resolver.tiers.insert(tier, config);
        self
    }

    /// Map a permission onto a tier.
    pub fn permission(mut self, permission: Permission, tier: Tier) -> Self {
        self.resolver.permission_tiers.insert(permission, tier);
        self
    }

    /// Register an endpoint override. The pattern is compiled here.
    pub fn endpoint(mut self, method: &str, pattern: &str, config: LimitConfig) -> Result<Self> {
        let pattern = EndpointPattern::compile(pattern)?;
        let endpoint = EndpointOverride {
            method: method.trim().to_ascii_uppercase(),
            pattern,
            config,
        };

        if endpoint.pattern.is_literal() {
            self.resolver.literal_overrides.push(endpoint);
        } else {
            self.resolver.pattern_overrides.push(endpoint);
        }
        Ok(self)
    }

    /// Finish building.
    pub fn build(self) -> LimitResolver {
        self.resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limit(max: u32, window_ms: u64) -> LimitConfig {
        LimitConfig::new(max, Duration::from_millis(window_ms))
    }

    fn platform_resolver() -> LimitResolver {
        LimitResolver::from_config(&LimitsConfig::default()).unwrap()
    }

    #[test]
    fn test_endpoint_override_beats_wildcard_tier() {
        let resolver = platform_resolver();
        let config = resolver.resolve_config("POST", "/auth/login", &[Permission::Wildcard], true);

        assert_eq!(config.max_requests, 10);
        assert_eq!(config.window_ms(), 900_000);
        assert_ne!(Some(config), resolver.tier_config(Tier::Standard));
    }

    #[test]
    fn test_endpoint_override_applies_to_anonymous_callers() {
        let resolver = platform_resolver();
        let config = resolver.resolve_config("post", "/auth/login", &[], false);
        assert_eq!(config.key_prefix.as_deref(), Some("auth-login"));
    }

    #[test]
    fn test_method_must_match() {
        let resolver = platform_resolver();
        let config = resolver.resolve_config("GET", "/auth/login", &[], true);
        assert_eq!(config, resolver.default_config(true));
    }

    #[test]
    fn test_placeholder_and_wildcard_overrides() {
        let resolver = platform_resolver();

        let download = resolver.resolve_config("GET", "/files/f-1/download", &[], true);
        assert_eq!(download.key_prefix.as_deref(), Some("download"));

        let transform = resolver.resolve_config("POST", "/transforms/resize/webp", &[], true);
        assert_eq!(transform.key_prefix.as_deref(), Some("transform"));
    }

    #[test]
    fn test_literal_checked_before_patterns() {
        let resolver = LimitResolver::builder(limit(100, 1000), limit(10, 1000))
            .endpoint("GET", "/files/:id", limit(1, 1000))
            .unwrap()
            .endpoint("GET", "/files/latest", limit(2, 1000))
            .unwrap()
            .build();

        assert_eq!(
            resolver.resolve_config("GET", "/files/latest", &[], true).max_requests,
            2
        );
        assert_eq!(
            resolver.resolve_config("GET", "/files/other", &[], true).max_requests,
            1
        );
    }

    #[test]
    fn test_patterns_checked_in_registration_order() {
        let resolver = LimitResolver::builder(limit(100, 1000), limit(10, 1000))
            .endpoint("*", "/api/*", limit(7, 1000))
            .unwrap()
            .endpoint("GET", "/api/:thing", limit(3, 1000))
            .unwrap()
            .build();

        assert_eq!(
            resolver.resolve_config("GET", "/api/files", &[], true).max_requests,
            7
        );
        assert_eq!(
            resolver.resolve_config("DELETE", "/api/files", &[], true).max_requests,
            7
        );
    }

    #[test]
    fn test_most_restrictive_permission_wins() {
        let resolver = platform_resolver();
        let config = resolver.resolve_config(
            "GET",
            "/projects",
            &[Permission::FilesRead, Permission::TransformsCreate, Permission::FilesWrite],
            true,
        );
        assert_eq!(Some(config), resolver.tier_config(Tier::Expensive));
    }

    #[test]
    fn test_wildcard_permission_is_considered_alone() {
        let resolver = platform_resolver();
        let config = resolver.resolve_config(
            "GET",
            "/projects",
            &[Permission::TransformsCreate, Permission::Wildcard],
            true,
        );
        assert_eq!(Some(config), resolver.tier_config(Tier::Standard));
    }

    #[test]
    fn test_unmapped_permission_falls_through_to_default() {
        let resolver = platform_resolver();

        let config = resolver.resolve_config("GET", "/webhooks", &[Permission::WebhooksManage], true);
        assert_eq!(config, resolver.default_config(true));

        let config = resolver.resolve_config("GET", "/webhooks", &[Permission::WebhooksManage], false);
        assert_eq!(config, resolver.default_config(false));
    }

    #[test]
    fn test_unmapped_permission_is_skipped_among_mapped() {
        let resolver = platform_resolver();
        let config = resolver.resolve_config(
            "GET",
            "/files",
            &[Permission::WebhooksManage, Permission::FilesRead],
            true,
        );
        assert_eq!(Some(config), resolver.tier_config(Tier::Read));
    }

    #[test]
    fn test_default_selection() {
        let resolver = platform_resolver();
        let authed = resolver.resolve_config("GET", "/organizations", &[], true);
        let anon = resolver.resolve_config("GET", "/organizations", &[], false);
        assert!(anon.is_more_restrictive_than(authed));
    }

    #[test]
    fn test_most_restrictive_merge() {
        let resolver = platform_resolver();
        let loose = limit(100, 3_600_000);
        let tight = limit(10, 3_600_000);

        assert_eq!(resolver.most_restrictive([&loose, &tight]), &tight);
    }

    #[test]
    fn test_most_restrictive_tie_keeps_first() {
        let resolver = platform_resolver();
        let first = limit(1, 1000).with_key_prefix("first");
        let second = limit(60, 60_000).with_key_prefix("second");

        let picked = resolver.most_restrictive([&first, &second]);
        assert_eq!(picked.key_prefix.as_deref(), Some("first"));
    }

    #[test]
    fn test_most_restrictive_of_nothing_is_authenticated_default() {
        let resolver = platform_resolver();
        assert_eq!(
            resolver.most_restrictive(std::iter::empty()),
            resolver.default_config(true)
        );
    }

    #[test]
    fn test_invalid_endpoint_pattern_is_rejected() {
        let result = LimitResolver::builder(limit(100, 1000), limit(10, 1000))
            .endpoint("GET", "files/:id", limit(1, 1000));
        assert!(result.is_err());
    }
}
