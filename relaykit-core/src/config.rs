//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/relaykit/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/relaykit/` (~/.config/relaykit/)
//! - Data (queue snapshots): `$XDG_DATA_HOME/relaykit/` (~/.local/share/relaykit/)
//! - State/Logs: `$XDG_STATE_HOME/relaykit/` (~/.local/state/relaykit/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Agent-wide upload configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Process-wide agent configuration.
///
/// `account_identifier`, `auth_key` and `server_url_template` must all be set
/// before an upload can be initiated; [`AgentConfig::is_upload_ready`] gates
/// every upload attempt.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Account identifier assigned by the remote collector
    pub account_identifier: Option<String>,

    /// API key used as the Bearer token on uploads
    pub auth_key: Option<String>,

    /// Upload URL template; the `{account}` placeholder is substituted with
    /// the urlencoded account identifier (e.g. `https://collect.example.com/v1/{account}/events`)
    pub server_url_template: Option<String>,

    /// Identity attached to events that do not carry their own.
    ///
    /// Can also be set at runtime through the coordinator.
    pub current_user_identity: Option<String>,

    /// Override for the durable-storage root directory (defaults to the XDG
    /// data dir)
    pub data_dir: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient upload failures within one dispatch
    #[serde(default = "default_upload_max_retries")]
    pub max_retries: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            account_identifier: None,
            auth_key: None,
            server_url_template: None,
            current_user_identity: None,
            data_dir: None,
            timeout_secs: default_upload_timeout(),
            max_retries: default_upload_max_retries(),
        }
    }
}

impl AgentConfig {
    /// Check whether the upload credentials and destination are all set.
    pub fn is_upload_ready(&self) -> bool {
        self.account_identifier.is_some()
            && self.auth_key.is_some()
            && self.server_url_template.is_some()
    }

    /// Validate the upload surface, returning an error naming the first
    /// missing piece.
    pub fn validate_upload(&self) -> Result<()> {
        if self.account_identifier.is_none() {
            return Err(Error::Config(
                "agent.account_identifier is required for upload".to_string(),
            ));
        }
        if self.auth_key.is_none() {
            return Err(Error::Config(
                "agent.auth_key is required for upload".to_string(),
            ));
        }
        if self.server_url_template.is_none() {
            return Err(Error::Config(
                "agent.server_url_template is required for upload".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the durable-storage root (override or XDG data dir).
    pub fn storage_root(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(Config::data_dir)
    }
}

fn default_upload_timeout() -> u64 {
    30
}

fn default_upload_max_retries() -> usize {
    3
}

/// Per-queue append and upload-readiness policy.
///
/// Fixed for the lifetime of a queue; changing policy requires removing and
/// recreating the queue.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct QueueConfig {
    /// Drop an append whose content matches the current tail event
    #[serde(default)]
    pub append_only_when_different: bool,

    /// Queue is upload-ready once it holds strictly more than this many events
    #[serde(default = "default_upload_when_more_than")]
    pub upload_when_more_than: usize,

    /// Queue is upload-ready once its oldest event is older than this many
    /// seconds; 0 disables the age rule
    #[serde(default = "default_upload_when_older_than")]
    pub upload_when_older_than_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            append_only_when_different: false,
            upload_when_more_than: default_upload_when_more_than(),
            upload_when_older_than_secs: default_upload_when_older_than(),
        }
    }
}

fn default_upload_when_more_than() -> usize {
    10
}

fn default_upload_when_older_than() -> u64 {
    600
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/relaykit/config.toml` (~/.config/relaykit/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("relaykit").join("config.toml")
    }

    /// Returns the data directory path (queue and uploader snapshots)
    ///
    /// `$XDG_DATA_HOME/relaykit/` (~/.local/share/relaykit/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("relaykit")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/relaykit/` (~/.local/state/relaykit/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("relaykit")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/relaykit/relaykit.log` (~/.local/state/relaykit/relaykit.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("relaykit.log")
    }
}
