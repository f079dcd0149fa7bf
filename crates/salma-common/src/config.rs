//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::{ConfigError, Result};

/// Offline worker configuration.
///
/// The store name doubles as the version identifier reported to clients, so
/// bumping `version` is what invalidates every cache from a previous deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix shared by every store this application has ever created
    pub cache_prefix: String,

    /// Version tag of the current deploy
    pub version: String,

    /// Origin the application is served from
    pub origin: Url,

    /// Path of the root document, used as the navigation fallback
    pub root_path: String,

    /// URLs bulk-fetched at install time, relative to `origin` or absolute
    pub precache: Vec<String>,

    /// Application name shown as the notification title
    pub app_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "salma-organizer".to_string(),
            version: "v2".to_string(),
            origin: Url::parse("http://localhost:8080/").expect("static origin parses"),
            root_path: "/".to_string(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "https://cdn.tailwindcss.com".to_string(),
                "https://fonts.googleapis.com/css2?family=Cairo:wght@200;300;400;500;600;700;800&display=swap"
                    .to_string(),
                "https://unpkg.com/react@18/umd/react.production.min.js".to_string(),
                "https://unpkg.com/react-dom@18/umd/react-dom.production.min.js".to_string(),
            ],
            app_name: "منظم سلمى".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the fields the worker depends on.
    pub fn validate(&self) -> Result<()> {
        if self.cache_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("cache_prefix", "must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::invalid("version", "must not be empty"));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "origin",
                format!("unsupported scheme `{}`", self.origin.scheme()),
            ));
        }
        if !self.root_path.starts_with('/') {
            return Err(ConfigError::invalid("root_path", "must start with `/`"));
        }
        Ok(())
    }

    /// Name of the active cache store, e.g. `salma-organizer-v2`.
    pub fn store_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Absolute URL of the root document.
    pub fn root_url(&self) -> Result<Url> {
        Ok(self.origin.join(&self.root_path)?)
    }

    /// Resolve a manifest entry against the application origin.
    pub fn resolve(&self, entry: &str) -> Result<Url> {
        Ok(self.origin.join(entry)?)
    }

    /// Return a copy with a different version tag.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}
