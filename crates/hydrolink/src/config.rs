//! Configuration parsing
//!
//! Reads settings from `~/.hydrolink/config.toml`. Every key is optional;
//! missing keys fall back to the defaults in `hydrolink_protocol::defaults`.
//!
//! ```toml
//! [polling]
//! task_check_interval_ms = 2500
//! task_check_retries = 4
//!
//! [monitor]
//! message_wait_ms = 250
//! shutdown_timeout_ms = 5000
//!
//! [downloads]
//! chunk_size = 1048576
//!
//! [logging]
//! filter = "hydrolink=debug"
//! console = "warnings"   # full | warnings | off
//! max_files = 5
//! max_file_size_mb = 10
//! ```

use hydrolink_protocol::defaults::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MESSAGE_WAIT_MS, DEFAULT_MONITOR_SHUTDOWN_TIMEOUT_MS,
    DEFAULT_TASK_CHECK_INTERVAL_MS, DEFAULT_TASK_CHECK_RETRIES,
};
use hydrolink_logging::{ConsoleOutput, LogConfig, DEFAULT_MAX_LOG_FILES};
use hydrolink_worker::PollConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_TASK_CHECK_INTERVAL_MS: &str = "HYDROLINK_TASK_CHECK_INTERVAL_MS";
const ENV_TASK_CHECK_RETRIES: &str = "HYDROLINK_TASK_CHECK_RETRIES";

/// Error type for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HydrolinkConfig {
    pub polling: PollingConfig,
    pub monitor: MonitorSettings,
    pub downloads: DownloadSettings,
    pub logging: LoggingSettings,
}

/// Polling of long-running server-side tasks
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub task_check_interval_ms: u64,
    pub task_check_retries: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            task_check_interval_ms: DEFAULT_TASK_CHECK_INTERVAL_MS,
            task_check_retries: DEFAULT_TASK_CHECK_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub message_wait_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            message_wait_ms: DEFAULT_MESSAGE_WAIT_MS,
            shutdown_timeout_ms: DEFAULT_MONITOR_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub chunk_size: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleSetting {
    Full,
    Warnings,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directives for the log file.
    pub filter: Option<String>,
    pub console: ConsoleSetting,
    pub max_files: usize,
    pub max_file_size_mb: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: None,
            console: ConsoleSetting::Warnings,
            max_files: DEFAULT_MAX_LOG_FILES,
            max_file_size_mb: 10,
        }
    }
}

impl HydrolinkConfig {
    /// Logging setup for a host named `app_name`, writing under `~/.hydrolink/logs`.
    pub fn log_config(&self, app_name: &str) -> LogConfig {
        let settings = &self.logging;
        LogConfig {
            filter: settings.filter.clone(),
            console: match settings.console {
                ConsoleSetting::Full => ConsoleOutput::Full,
                ConsoleSetting::Warnings => ConsoleOutput::WarningsOnly,
                ConsoleSetting::Off => ConsoleOutput::Off,
            },
            max_files: settings.max_files,
            max_file_size: settings.max_file_size_mb.saturating_mul(1024 * 1024),
            ..LogConfig::new(app_name)
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.polling.task_check_interval_ms),
            retries: self.polling.task_check_retries,
        }
    }

    pub fn message_wait(&self) -> Duration {
        Duration::from_millis(self.monitor.message_wait_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor.shutdown_timeout_ms)
    }

    /// Apply `HYDROLINK_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_TASK_CHECK_INTERVAL_MS) {
            self.polling.task_check_interval_ms =
                parse_env(ENV_TASK_CHECK_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_TASK_CHECK_RETRIES) {
            self.polling.task_check_retries = parse_env(ENV_TASK_CHECK_RETRIES, &value)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}

/// Load configuration from a file. A missing file yields the defaults.
pub fn load_config(config_path: &Path) -> Result<HydrolinkConfig> {
    if !config_path.exists() {
        return Ok(HydrolinkConfig::default());
    }

    let content = std::fs::read_to_string(config_path)?;
    Ok(toml::from_str(&content)?)
}

/// Default config location: ~/.hydrolink/config.toml
pub fn default_config_path() -> PathBuf {
    hydrolink_logging::hydrolink_home().join("config.toml")
}

/// Load configuration from the default location, then apply environment overrides.
pub fn load_default_config() -> Result<HydrolinkConfig> {
    let mut config = load_config(&default_config_path())?;
    config.apply_env_overrides()?;
    Ok(config)
}

/// Install the global log subscriber configured by `config`. Returns the
/// live log file.
pub fn init_logging(config: &HydrolinkConfig, app_name: &str) -> anyhow::Result<PathBuf> {
    hydrolink_logging::init_logging(&config.log_config(app_name))
}
