//! Configuration management for Bucketgate.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::Result;

/// Prefix for environment variable overrides, e.g. `BUCKETGATE__STORE__MAX_ENTRIES`.
pub const ENV_PREFIX: &str = "BUCKETGATE";

/// Main configuration for the Bucketgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limit rules configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Public API address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Admin API address
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 9091))
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of tracked caller keys
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Idle time after which a key is swept, in seconds
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// How often the sweep runs, in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl StoreConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            stale_after_secs: default_stale_after(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_stale_after() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    60
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to rate limit rules; the built-in platform rules apply when unset
    pub config_path: Option<String>,

    /// Rules reload interval in seconds, 0 disables reloading
    #[serde(default = "default_reload_interval")]
    pub config_reload_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            config_reload_interval_secs: default_reload_interval(),
        }
    }
}

fn default_reload_interval() -> u64 {
    60
}

impl ServiceConfig {
    /// Load configuration from an optional file layered with environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
