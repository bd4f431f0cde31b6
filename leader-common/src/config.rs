//! Service configuration.
//!
//! Loaded from `~/.leader-screener/config.json`. Every section has defaults so
//! a missing file or a partial file yields a usable configuration. Stage
//! thresholds live under the free-form `pipeline` key and are typed by the
//! screener crate.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::util::expand_path;

/// Directory holding the configuration file.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".leader-screener"),
        |dirs| dirs.home_dir().join(".leader-screener"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Stage thresholds, parsed by the screener crate.
    #[serde(default)]
    pub pipeline: serde_json::Value,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file is not an error; defaults are used.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `LEADER_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("LEADER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("LEADER_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(dir) = std::env::var("LEADER_DATA_DIR") {
            self.storage.data_dir = dir;
        }
        if let Ok(dir) = std::env::var("LEADER_SNAPSHOT_DIR") {
            self.storage.snapshot_dir = dir;
        }
        if let Ok(cron) = std::env::var("LEADER_RUN_CRON") {
            self.schedule.run_cron = cron;
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets held at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Storage
// ============================================================================

/// Where input data is read from and snapshots are published to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Pre-fetched market data (benchmark.json, universe.json, tickers/)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Published snapshots and run locks
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,

    /// Write a Markdown summary next to each published run
    #[serde(default = "default_true")]
    pub markdown_report: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_dir: default_snapshot_dir(),
            markdown_report: true,
        }
    }
}

impl StorageConfig {
    /// Data directory with `~` and env vars expanded.
    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    /// Snapshot directory with `~` and env vars expanded.
    pub fn snapshot_path(&self) -> PathBuf {
        expand_path(&self.snapshot_dir)
    }
}

fn default_data_dir() -> String {
    "~/.leader-screener/data".to_string()
}

fn default_snapshot_dir() -> String {
    "~/.leader-screener/snapshots".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Schedule
// ============================================================================

/// Batch cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Six-field cron expression (sec min hour dom mon dow), evaluated in UTC.
    #[serde(default = "default_run_cron")]
    pub run_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_cron: default_run_cron(),
        }
    }
}

fn default_run_cron() -> String {
    "0 0 18 * * Mon-Fri".to_string() // 18:00 UTC on weekdays
}
