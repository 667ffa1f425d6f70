//! Configuration
//!
//! Loads a JSON5 config file, layers `VOTEBOT_*` environment variables on
//! top, and validates the result.

mod types;

pub use types::{
    Config, LogFormat, LoggingConfig, StorageBackend, StorageConfig, ValidationError,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "VOTEBOT_CONFIG_PATH";

/// Config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "votebot.json5";

/// Environment overrides, applied after the file is read
const ENV_OVERRIDES: &[(&str, fn(&mut Config, String))] = &[
    ("VOTEBOT_MATTERMOST_URL", |c, v| c.mattermost.server_url = v),
    ("VOTEBOT_MATTERMOST_TOKEN", |c, v| c.mattermost.token = v),
    ("VOTEBOT_MATTERMOST_TEAM", |c, v| c.mattermost.team_name = v),
    ("VOTEBOT_BOT_USER_ID", |c, v| c.mattermost.bot_user_id = v),
    ("VOTEBOT_DATABASE_URL", |c, v| c.storage.database_url = v),
    ("VOTEBOT_LOG_LEVEL", |c, v| c.logging.level = v),
];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolve the config file path.
///
/// Order: explicit path, `VOTEBOT_CONFIG_PATH`, `./votebot.json5` if it
/// exists, then `<config dir>/votebot/config.json5`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("votebot").join("config.json5"))
        .unwrap_or(local)
}

/// Read a config file. A missing file yields the defaults.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    json5::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Apply overrides from `lookup`, which maps a variable name to its value
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    for (name, apply) in ENV_OVERRIDES {
        if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
            apply(config, value);
        }
    }
}

/// Load the file at the resolved path and apply process environment
/// overrides. Validation is left to the caller.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let path = resolve_config_path(explicit);
    let mut config = load_config_file(&path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Check a loaded config
pub fn validate(config: &Config, require_gateway: bool) -> Result<(), ConfigError> {
    config.validate(require_gateway).map_err(ConfigError::Invalid)
}
