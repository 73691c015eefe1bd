//! Configuration loading and management
//!
//! Configuration lives at `<home>/config.json`, where `<home>` is the engine
//! home directory (`$CMV_HOME` or `~/.cmv`). A missing file means defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the engine home directory (`$CMV_HOME` or `~/.cmv`).
pub fn cmv_home() -> PathBuf {
    std::env::var_os("CMV_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".cmv"))
}

/// Returns XDG_STATE_HOME or ~/.local/state (log file location)
pub fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct (`config.json`)
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Config {
    /// Explicit path to the host assistant binary (overrides PATH search)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_cli_path: Option<PathBuf>,

    /// Project to prefer when a session id is ambiguous across projects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_project: Option<PathBuf>,

    /// Auto-trim hook configuration
    #[serde(default, rename = "autoTrim")]
    pub auto_trim: AutoTrimConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Auto-trim hook settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoTrimConfig {
    /// Stub threshold in chars for tool results and tool inputs
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Minimum transcript size before PostToolUse trims at all
    #[serde(default = "default_size_threshold", rename = "sizeThresholdBytes")]
    pub size_threshold_bytes: u64,

    /// Rotating pre-trim backups kept per session id
    #[serde(default = "default_max_backups", rename = "maxBackups")]
    pub max_backups: usize,
}

impl Default for AutoTrimConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            size_threshold_bytes: default_size_threshold(),
            max_backups: default_max_backups(),
        }
    }
}

fn default_threshold() -> usize {
    500
}

fn default_size_threshold() -> u64 {
    600_000
}

fn default_max_backups() -> usize {
    5
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `<home>/config.json`, defaulting when absent.
    pub fn load_from_home(home: &Path) -> Result<Self> {
        let config_path = home.join("config.json");

        if !config_path.exists() {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/cmv/cmv.log` (~/.local/state/cmv/cmv.log)
    pub fn log_path() -> PathBuf {
        xdg_state_home().join("cmv").join("cmv.log")
    }
}
