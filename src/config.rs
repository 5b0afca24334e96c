//! Configuration loader and validator for the knox-pos sync daemon.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub remote: Remote,
    pub policy: Policy,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub data_dir: String,
    /// How often the daemon probes the remote store for connectivity.
    pub probe_interval_ms: u64,
    /// Settle delay after a connection returns before the queue is drained,
    /// so a flapping link does not trigger back-to-back passes.
    pub sync_debounce_ms: u64,
}

/// Remote document store settings (Firebase-style REST tree).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Remote {
    pub base_url: String,
    /// Optional `?auth=` token appended to every request.
    #[serde(default)]
    pub auth: Option<String>,
}

/// Cache freshness and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    /// Reads within this window of the last local write stay local.
    pub freshness_window_mins: i64,
    /// A queued change is discarded after this many failed replays.
    pub max_sync_attempts: i32,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.probe_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.probe_interval_ms must be > 0"));
    }

    if cfg.remote.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.base_url must be non-empty"));
    }
    if !cfg.remote.base_url.starts_with("http://") && !cfg.remote.base_url.starts_with("https://") {
        return Err(ConfigError::Invalid("remote.base_url must be an http(s) URL"));
    }

    if cfg.policy.freshness_window_mins < 0 {
        return Err(ConfigError::Invalid(
            "policy.freshness_window_mins must be >= 0",
        ));
    }
    if cfg.policy.max_sync_attempts <= 0 {
        return Err(ConfigError::Invalid("policy.max_sync_attempts must be > 0"));
    }

    Ok(())
}

/// Example YAML document, used by tests and `--help` style docs.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  probe_interval_ms: 15000
  sync_debounce_ms: 1000

remote:
  base_url: "https://knox-pos-default-rtdb.firebaseio.com"
  auth: "YOUR_DATABASE_SECRET"

policy:
  freshness_window_mins: 5
  max_sync_attempts: 3
"#
}
