//! Typed configuration structures
//!
//! Provides strongly-typed access to configuration values with validation
//! and default values.

use crate::channels::MattermostConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Chat server connection
    pub mattermost: MattermostConfig,

    /// Poll store
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate the configuration.
    ///
    /// Gateway settings are only checked when `require_gateway` is set, so
    /// storage maintenance can run without chat credentials.
    pub fn validate(&self, require_gateway: bool) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if require_gateway {
            let mm = &self.mattermost;
            if mm.server_url.trim().is_empty() {
                errors.push(ValidationError::new(
                    "mattermost.serverUrl",
                    "server URL is required",
                ));
            } else if let Err(e) = url::Url::parse(&mm.server_url) {
                errors.push(ValidationError::new(
                    "mattermost.serverUrl",
                    format!("invalid URL: {}", e),
                ));
            }
            if mm.token.trim().is_empty() {
                errors.push(ValidationError::new("mattermost.token", "token is required"));
            }
        }

        let storage = &self.storage;
        if storage.backend == StorageBackend::Sqlite && storage.database_url.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.databaseUrl",
                "database URL is required for the sqlite backend",
            ));
        }
        if storage.max_connections == 0 {
            errors.push(ValidationError::new(
                "storage.maxConnections",
                "must be at least 1",
            ));
        }
        if storage.operation_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "storage.operationTimeoutMs",
                "must be greater than 0",
            ));
        }
        if storage.vote_page_size == 0 {
            errors.push(ValidationError::new(
                "storage.votePageSize",
                "must be at least 1",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Which repository implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Non-durable; for dry runs
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// sqlx connection string, e.g. `sqlite://votebot.db`
    pub database_url: String,

    pub max_connections: u32,

    /// Upper bound for any single store call
    pub operation_timeout_ms: u64,

    /// Rows fetched per page when loading votes
    pub vote_page_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_url: "sqlite://votebot.db".to_string(),
            max_connections: 5,
            operation_timeout_ms: 5_000,
            vote_page_size: 500,
        }
    }
}

impl StorageConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Filter directive (error, warn, info, debug, trace, or per-target)
    pub level: String,

    /// Log format (json, text)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
