//! Error types for the Bucketgate service.

use thiserror::Error;

/// Main error type for Bucketgate operations.
#[derive(Error, Debug)]
pub enum BucketgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller exhausted its quota for the current window
    #[error("Too many requests, retry after {retry_after_secs} seconds")]
    TooManyRequests {
        /// Seconds until the oldest counted request leaves the window
        retry_after_secs: u32,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for BucketgateError {
    fn from(err: config::ConfigError) -> Self {
        BucketgateError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for BucketgateError {
    fn from(err: serde_yaml::Error) -> Self {
        BucketgateError::Config(format!("Invalid YAML: {}", err))
    }
}

/// Result type alias for Bucketgate operations.
pub type Result<T> = std::result::Result<T, BucketgateError>;
