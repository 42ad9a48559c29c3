//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/chatvault/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/chatvault/` (~/.config/chatvault/)
//! - State/Logs: `$XDG_STATE_HOME/chatvault/` (~/.local/state/chatvault/)
//!
//! Every section is optional:
//!
//! ```toml
//! [storage]
//! storage_dir = "/home/me/.config/Code/User/workspaceStorage"
//! editor_variants = ["Code - Insiders", "VSCodium"]
//!
//! [connection]
//! timeout_ms = 5000
//! retry_cooldown_ms = 5000
//!
//! [breaker]
//! enabled = true
//! failure_threshold = 5
//!
//! [parser]
//! strict = false
//!
//! [logging]
//! level = "info"
//! ```

use crate::breaker::BreakerConfig;
use crate::db::ConnectionConfig;
use crate::error::{Error, Result};
use crate::parser::ParserConfig;
use crate::platform::DEFAULT_EDITOR_VARIANTS;
use crate::reader::ReaderConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

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

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Where to look for workspace databases
    #[serde(default)]
    pub storage: StorageConfig,

    /// Connection manager settings
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Circuit breaker and retry policy
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Session validation strictness
    #[serde(default)]
    pub parser: ParserSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Workspace storage location
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Explicit `workspaceStorage` directory; skips platform detection
    pub storage_dir: Option<PathBuf>,

    /// Alternate installation folders tried after `Code`
    #[serde(default = "default_editor_variants")]
    pub editor_variants: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            editor_variants: default_editor_variants(),
        }
    }
}

fn default_editor_variants() -> Vec<String> {
    DEFAULT_EDITOR_VARIANTS.iter().map(|v| v.to_string()).collect()
}

#[derive(Debug, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// Open and busy timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub must_exist: bool,

    /// How long a path fails fast after a failed open, in milliseconds
    #[serde(default = "default_retry_cooldown_ms")]
    pub retry_cooldown_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_only: true,
            timeout_ms: default_timeout_ms(),
            must_exist: true,
            retry_cooldown_ms: default_retry_cooldown_ms(),
        }
    }
}

impl ConnectionSettings {
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            read_only: self.read_only,
            timeout: Duration::from_millis(self.timeout_ms),
            must_exist: self.must_exist,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retry_cooldown_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize)]
pub struct BreakerSettings {
    /// Wrap reads in the circuit breaker
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            monitoring_window_ms: default_monitoring_window_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            monitoring_window: Duration::from_millis(self.monitoring_window_ms),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(Error::Config(
                "breaker.success_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms == 0 {
            return Err(Error::Config(
                "breaker.max_delay_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_monitoring_window_ms() -> u64 {
    120_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
pub struct ParserSettings {
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub require_session_id: bool,

    #[serde(default)]
    pub allow_empty_sessions: bool,

    #[serde(default = "default_true")]
    pub validate_timestamps: bool,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            strict: false,
            require_session_id: false,
            allow_empty_sessions: false,
            validate_timestamps: true,
        }
    }
}

impl ParserSettings {
    pub fn to_parser_config(&self) -> ParserConfig {
        ParserConfig {
            strict: self.strict,
            require_session_id: self.require_session_id,
            allow_empty_sessions: self.allow_empty_sessions,
            validate_timestamps: self.validate_timestamps,
        }
    }
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
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the breaker or logging unusable.
    pub fn validate(&self) -> Result<()> {
        self.breaker.validate()?;
        if self.connection.timeout_ms == 0 {
            return Err(Error::Config(
                "connection.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.logging.max_files == 0 {
            return Err(Error::Config(
                "logging.max_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime configuration for a [`DatabaseReader`](crate::reader::DatabaseReader).
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            storage_dir: self.storage.storage_dir.clone(),
            editor_variants: self.storage.editor_variants.clone(),
            connection: self.connection.to_connection_config(),
            retry_cooldown: Duration::from_millis(self.connection.retry_cooldown_ms),
            use_breaker: self.breaker.enabled,
            breaker: self.breaker.to_breaker_config(),
            parser: self.parser.to_parser_config(),
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/chatvault/config.toml` (~/.config/chatvault/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("chatvault").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/chatvault/` (~/.local/state/chatvault/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("chatvault")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/chatvault/chatvault.log` (~/.local/state/chatvault/chatvault.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("chatvault.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
