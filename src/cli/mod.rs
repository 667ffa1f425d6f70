//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- connect to Mattermost and serve poll commands
//! - `config show|get|path` -- inspect configuration
//! - `reconcile` -- remove votes whose poll no longer exists
//! - `version` -- print build/version info

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Poll bot for Mattermost.
#[derive(Parser, Debug)]
#[command(
    name = "votebot",
    version = env!("CARGO_PKG_VERSION"),
    about = "votebot - quick single-choice polls for Mattermost"
)]
pub struct Cli {
    /// Path to the JSON5 config file.
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the bot (default when no subcommand is given).
    Start,

    /// Inspect configuration values.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Delete votes that belong to polls which no longer exist.
    Reconcile,

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration (secrets redacted) as JSON.
    Show,

    /// Print a specific configuration value by dot-notation path.
    Get {
        /// Dot-notation key (e.g. "storage.backend", "mattermost.serverUrl").
        key: String,
    },

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use crate::{bot, config, logging};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Secrets that should be redacted when printing config.
const SECRET_KEYS: &[&str] = &["token", "secret", "password"];

/// Run the `start` subcommand.
pub async fn handle_start(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config(config_path)?;
    logging::init_logging(&cfg.logging)?;
    config::validate(&cfg, true)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        bot::shutdown_signal().await;
        signal_cancel.cancel();
    });

    bot::run(cfg, cancel).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Run the `config show` subcommand.
pub fn handle_config_show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = serde_json::to_value(config::load_config(config_path)?)?;
    let redacted = redact_secrets(cfg);
    let pretty = serde_json::to_string_pretty(&redacted)?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config get <key>` subcommand.
pub fn handle_config_get(
    config_path: Option<&Path>,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = redact_secrets(serde_json::to_value(config::load_config(config_path)?)?);
    match get_value_at_path(&cfg, key) {
        Some(value) => {
            let pretty = serde_json::to_string_pretty(&value)?;
            println!("{}", pretty);
        }
        None => {
            eprintln!("Key not found: {}", key);
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(config_path: Option<&Path>) {
    println!("{}", config::resolve_config_path(config_path).display());
}

/// Run the `reconcile` subcommand.
pub async fn handle_reconcile(
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config(config_path)?;
    logging::init_logging(&cfg.logging)?;
    config::validate(&cfg, false)?;

    let store = bot::open_store(&cfg.storage).await?;
    let result = bot::reconcile(&store).await;
    store.close().await;

    println!("Removed {} orphaned vote(s)", result?);
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("votebot {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("VOTEBOT_BUILD_DATE"));
    println!("  Git commit: {}", env!("VOTEBOT_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Navigate a JSON value by dot-notation path and return the leaf value.
fn get_value_at_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}

/// Redact known secret keys in a JSON value (recursive). Empty values are
/// left as they are so missing credentials stay visible.
fn redact_secrets(mut value: Value) -> Value {
    match &mut value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let lower = key.to_lowercase();
                let is_secret = SECRET_KEYS.iter().any(|s| lower.contains(s));
                let is_empty = map.get(&key).and_then(Value::as_str) == Some("");
                if is_secret && !is_empty {
                    map.insert(key, Value::String("[REDACTED]".to_string()));
                } else if let Some(child) = map.remove(&key) {
                    map.insert(key, redact_secrets(child));
                }
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                *item = redact_secrets(item.take());
            }
        }
        _ => {}
    }
    if let Value::String(s) = &value {
        let sanitized = logging::sanitize_log_message(s);
        if &sanitized != s {
            return Value::String(sanitized);
        }
    }
    value
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
