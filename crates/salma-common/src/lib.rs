//! # Salma Common
//!
//! Shared configuration, error types, and logging setup for the Salma offline worker.
//!
//! ## Features
//!
//! - Worker configuration (version tag, precache manifest, app origin)
//! - Logging configuration and setup
//! - Configuration error type

use std::path::PathBuf;
use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::WorkerConfig;
pub use logging::{init_logging, LogConfig, LogFormat};

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for [`WorkerConfig`].
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A URL field could not be parsed.
    #[error("Invalid URL in config: {0}")]
    Url(#[from] url::ParseError),

    /// A field holds a value the worker cannot run with.
    #[error("Invalid config value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    /// Create an invalid-field error.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
