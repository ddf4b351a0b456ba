//! Rate limit rules configuration.
//!
//! Rules are declared once at startup (from YAML or the built-in table) and
//! turned into immutable [`LimitConfig`] values. The [`LimitResolver`] is
//! assembled from a [`LimitsConfig`].
//!
//! [`LimitResolver`]: super::LimitResolver

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::permission::{Permission, Tier};
use crate::error::{BucketgateError, Result};

/// Longest window a rule may declare.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 86_400);

/// A limit of `max_requests` per trailing `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitConfig {
    /// Length of the trailing window
    pub window: Duration,
    /// Maximum admitted requests inside the window
    pub max_requests: u32,
    /// Namespace for counters tracked under this limit
    pub key_prefix: Option<String>,
}

impl LimitConfig {
    /// Create a limit without a key prefix.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            window,
            max_requests,
            key_prefix: None,
        }
    }

    /// Track counters for this limit under their own namespace.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    /// Whether this limit admits fewer requests per millisecond than `other`.
    ///
    /// Compared by cross-multiplication so that no precision is lost for
    /// very long windows. Equal ratios are not more restrictive.
    pub fn is_more_restrictive_than(&self, other: &LimitConfig) -> bool {
        let lhs = u128::from(self.max_requests) * u128::from(other.window_ms());
        let rhs = u128::from(other.max_requests) * u128::from(self.window_ms());
        lhs < rhs
    }
}

/// Time unit for rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// A rate limit rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Number of requests allowed per window
    pub requests_per_unit: u32,
    /// The time unit
    pub unit: TimeUnit,
    /// How many units make up the window
    #[serde(default = "default_unit_count")]
    pub unit_count: u32,
    /// Optional counter namespace
    #[serde(default)]
    pub key_prefix: Option<String>,
}

fn default_unit_count() -> u32 {
    1
}

impl RateLimitRule {
    /// Create a rule spanning `unit_count` units.
    pub fn new(requests_per_unit: u32, unit: TimeUnit, unit_count: u32) -> Self {
        Self {
            requests_per_unit,
            unit,
            unit_count,
            key_prefix: None,
        }
    }

    fn prefixed(mut self, prefix: &str) -> Self {
        self.key_prefix = Some(prefix.to_string());
        self
    }

    /// Validate the rule and turn it into a [`LimitConfig`].
    pub fn to_limit_config(&self) -> Result<LimitConfig> {
        if self.requests_per_unit == 0 {
            return Err(BucketgateError::Config(
                "requests_per_unit must be greater than zero".to_string(),
            ));
        }
        if self.unit_count == 0 {
            return Err(BucketgateError::Config(
                "unit_count must be greater than zero".to_string(),
            ));
        }
        if matches!(&self.key_prefix, Some(prefix) if prefix.is_empty()) {
            return Err(BucketgateError::Config(
                "key_prefix must not be empty".to_string(),
            ));
        }

        let window = self
            .unit
            .duration()
            .checked_mul(self.unit_count)
            .filter(|window| *window <= MAX_WINDOW)
            .ok_or_else(|| {
                BucketgateError::Config(format!(
                    "window of {} x {:?} exceeds {} days",
                    self.unit_count,
                    self.unit,
                    MAX_WINDOW.as_secs() / 86_400
                ))
            })?;

        Ok(LimitConfig {
            window,
            max_requests: self.requests_per_unit,
            key_prefix: self.key_prefix.clone(),
        })
    }
}

/// Limits applied when neither an endpoint override nor a permission tier matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultLimits {
    /// Applied to authenticated callers
    pub authenticated: RateLimitRule,
    /// Applied to anonymous callers
    pub unauthenticated: RateLimitRule,
}

/// A limit bound to a `(method, path pattern)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    /// HTTP method, or `*` for any method
    pub method: String,
    /// Path pattern, may contain `:param` segments and a trailing `*`
    pub path: String,
    /// The limit to apply
    pub rate_limit: RateLimitRule,
}

/// The complete set of limit tables consumed by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Fallback limits
    pub defaults: DefaultLimits,
    /// Named tier limits
    #[serde(default)]
    pub tiers: HashMap<Tier, RateLimitRule>,
    /// Permission to tier mapping
    #[serde(default)]
    pub permissions: HashMap<Permission, Tier>,
    /// Endpoint overrides, in registration order
    #[serde(default)]
    pub endpoints: Vec<EndpointRule>,
}

impl LimitsConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

impl Default for LimitsConfig {
    /// The limits of the file platform API.
    fn default() -> Self {
        let tiers = HashMap::from([
            (Tier::Read, RateLimitRule::new(300, TimeUnit::Minute, 1)),
            (Tier::Standard, RateLimitRule::new(100, TimeUnit::Minute, 1)),
            (Tier::Write, RateLimitRule::new(60, TimeUnit::Minute, 1)),
            (Tier::Delete, RateLimitRule::new(30, TimeUnit::Minute, 1)),
            (Tier::Expensive, RateLimitRule::new(10, TimeUnit::Minute, 1)),
            (Tier::Admin, RateLimitRule::new(50, TimeUnit::Minute, 1)),
        ]);

        // webhooks:manage is left unmapped and falls back to the defaults.
        let permissions = HashMap::from([
            (Permission::FilesRead, Tier::Read),
            (Permission::BucketsRead, Tier::Read),
            (Permission::ProjectsRead, Tier::Read),
            (Permission::AuditRead, Tier::Read),
            (Permission::FilesWrite, Tier::Write),
            (Permission::BucketsWrite, Tier::Write),
            (Permission::ProjectsWrite, Tier::Write),
            (Permission::FilesDelete, Tier::Delete),
            (Permission::BucketsDelete, Tier::Delete),
            (Permission::TransformsCreate, Tier::Expensive),
            (Permission::TokensManage, Tier::Admin),
            (Permission::Admin, Tier::Admin),
        ]);

        let endpoint = |method: &str, path: &str, rule: RateLimitRule| EndpointRule {
            method: method.to_string(),
            path: path.to_string(),
            rate_limit: rule,
        };

        let endpoints = vec![
            endpoint(
                "POST",
                "/auth/login",
                RateLimitRule::new(10, TimeUnit::Minute, 15).prefixed("auth-login"),
            ),
            endpoint(
                "POST",
                "/auth/register",
                RateLimitRule::new(5, TimeUnit::Hour, 1).prefixed("auth-register"),
            ),
            endpoint(
                "POST",
                "/auth/forgot-password",
                RateLimitRule::new(3, TimeUnit::Hour, 1).prefixed("auth-reset"),
            ),
            endpoint(
                "POST",
                "/buckets/:bucketId/files/upload*",
                RateLimitRule::new(50, TimeUnit::Minute, 1).prefixed("upload"),
            ),
            endpoint(
                "GET",
                "/files/:fileId/download",
                RateLimitRule::new(200, TimeUnit::Minute, 1).prefixed("download"),
            ),
            endpoint(
                "POST",
                "/transforms/*",
                RateLimitRule::new(20, TimeUnit::Minute, 1).prefixed("transform"),
            ),
        ];

        Self {
            defaults: DefaultLimits {
                authenticated: RateLimitRule::new(1000, TimeUnit::Minute, 15),
                unauthenticated: RateLimitRule::new(100, TimeUnit::Minute, 15),
            },
            tiers,
            permissions,
            endpoints,
        }
    }
}
