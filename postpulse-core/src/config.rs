//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/postpulse/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/postpulse/` (~/.config/postpulse/)
//! - Data: `$XDG_DATA_HOME/postpulse/` (~/.local/share/postpulse/)
//! - State/Logs: `$XDG_STATE_HOME/postpulse/` (~/.local/state/postpulse/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound for any top-N query.
pub const MAX_TOP_LIMIT: usize = 50;

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
    /// Aggregation cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Analytics query defaults
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Sample data generation
    #[serde(default)]
    pub seed: SeedConfig,
}

/// Aggregation cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Seconds between scheduled refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Persist published generations to the database
    #[serde(default = "default_persist")]
    pub persist: bool,

    /// Generations kept in the database (current + previous at minimum)
    #[serde(default = "default_retained_generations")]
    pub retained_generations: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            persist: default_persist(),
            retained_generations: default_retained_generations(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_persist() -> bool {
    true
}

fn default_retained_generations() -> usize {
    2
}

/// Analytics query defaults
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Trailing window in days used when a query gives none
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Default number of records for top-N queries
    #[serde(default = "default_top_limit")]
    pub top_limit: usize,

    /// Largest accepted top-N limit
    #[serde(default = "default_max_top_limit")]
    pub max_top_limit: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            top_limit: default_top_limit(),
            max_top_limit: default_max_top_limit(),
        }
    }
}

fn default_window_days() -> u32 {
    90
}

fn default_top_limit() -> usize {
    10
}

fn default_max_top_limit() -> usize {
    MAX_TOP_LIMIT
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

/// Sample data generation sizes
#[derive(Debug, Deserialize, Clone)]
pub struct SeedConfig {
    #[serde(default = "default_seed_authors")]
    pub authors: usize,
    #[serde(default = "default_seed_items")]
    pub items: usize,
    /// Cap on generated engagement events
    #[serde(default = "default_seed_events")]
    pub events: usize,
    /// RNG seed; the same seed always produces the same data
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            authors: default_seed_authors(),
            items: default_seed_items(),
            events: default_seed_events(),
            rng_seed: default_rng_seed(),
        }
    }
}

fn default_seed_authors() -> usize {
    50
}

fn default_seed_items() -> usize {
    10_000
}

fn default_seed_events() -> usize {
    50_000
}

fn default_rng_seed() -> u64 {
    42
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

    /// Validate value ranges, returning the first violation
    pub fn validate(&self) -> Result<()> {
        if self.cache.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "cache.refresh_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.cache.retained_generations < 2 {
            return Err(Error::Config(
                "cache.retained_generations must be at least 2".to_string(),
            ));
        }
        if self.analytics.window_days == 0 {
            return Err(Error::Config(
                "analytics.window_days must be greater than 0".to_string(),
            ));
        }
        if self.analytics.max_top_limit == 0 || self.analytics.max_top_limit > MAX_TOP_LIMIT {
            return Err(Error::Config(format!(
                "analytics.max_top_limit must be between 1 and {}",
                MAX_TOP_LIMIT
            )));
        }
        if self.analytics.top_limit == 0 || self.analytics.top_limit > self.analytics.max_top_limit
        {
            return Err(Error::Config(
                "analytics.top_limit must be between 1 and analytics.max_top_limit".to_string(),
            ));
        }
        if self.seed.authors == 0 {
            return Err(Error::Config("seed.authors must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/postpulse/config.toml` (~/.config/postpulse/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("postpulse").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/postpulse/` (~/.local/share/postpulse/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("postpulse")
    }

    /// Returns the state directory path (for logs and locks)
    ///
    /// `$XDG_STATE_HOME/postpulse/` (~/.local/state/postpulse/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("postpulse")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/postpulse/data.db` (~/.local/share/postpulse/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/postpulse/postpulse.log` (~/.local/state/postpulse/postpulse.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("postpulse.log")
    }

    /// Ensure XDG environment variables are set so every binary resolves the
    /// same paths. Call early in `main`, before any threads start.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.refresh_interval_secs, 300);
        assert!(config.cache.persist);
        assert_eq!(config.analytics.window_days, 90);
        assert_eq!(config.analytics.top_limit, 10);
        assert_eq!(config.analytics.max_top_limit, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[cache]
refresh_interval_secs = 60
persist = false

[analytics]
window_days = 30
top_limit = 5

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.cache.refresh_interval_secs, 60);
        assert!(!config.cache.persist);
        assert_eq!(config.cache.retained_generations, 2);
        assert_eq!(config.analytics.window_days, 30);
        assert_eq!(config.analytics.top_limit, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.seed.rng_seed, 42);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.analytics.max_top_limit = 80;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.retained_generations = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analytics.top_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[analytics]\nwindow_days = 0\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));

        std::fs::write(&path, "[analytics]\nwindow_days = 7\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.analytics.window_days, 7);
    }
}
