/// Runtime configuration for hydroview.
///
/// Settings come from a TOML file; every section and field is optional and
/// falls back to the defaults below. A `.env` file, if present, is loaded
/// first so `HYDROVIEW_CONFIG` can be set there.
///
/// Lookup order for the file:
///   1. an explicit path (e.g. `--config <path>`)
///   2. the `HYDROVIEW_CONFIG` environment variable
///   3. `hydroview.toml` in the working directory, if it exists
///   4. built-in defaults

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::logging::LogLevel;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "HYDROVIEW_CONFIG";

/// File looked for in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "hydroview.toml";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The file could not be read.
    Io(String),
    /// The file is not valid TOML for this schema.
    Parse(String),
    /// Values parsed but are out of range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub ensemble: EnsembleConfig,
    pub risk: RiskConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// NOAA endpoints and HTTP client settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub gauge_base_url: String,
    pub reach_base_url: String,
    pub hefs_base_url: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            gauge_base_url: "https://api.water.noaa.gov/nwps/v1/gauges".to_string(),
            reach_base_url: "https://api.water.noaa.gov/nwps/v1/reaches".to_string(),
            hefs_base_url: "https://api.water.noaa.gov/hefs/v1".to_string(),
            request_timeout_secs: 30,
            user_agent: "hydroview/0.1".to_string(),
        }
    }
}

/// HEFS member fetch limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Members fetched concurrently per batch.
    pub chunk_size: usize,
    pub member_timeout_secs: u64,
    /// How many run headers to ask for when looking for the latest run.
    pub header_limit: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            member_timeout_secs: 10,
            header_limit: 100,
        }
    }
}

/// HEFS runs span about a year; longer short-term windows are rejected.
pub const MAX_SHORT_TERM_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Length of the short-term exceedance window.
    pub short_term_days: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self { short_term_days: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_minutes: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub log_file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_file: None,
            console_timestamps: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse(msg) => {
                ConfigError::Parse(format!("'{}': {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Loads `.env`, resolves the config path and reads it, or returns the
    /// defaults when no file is configured.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let env_path = std::env::var(CONFIG_ENV_VAR).ok();
        match resolve_path(explicit, env_path.as_deref(), Path::new(DEFAULT_CONFIG_FILE)) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("provider.gauge_base_url", &self.provider.gauge_base_url),
            ("provider.reach_base_url", &self.provider.reach_base_url),
            ("provider.hefs_base_url", &self.provider.hefs_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }
        if self.provider.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "provider.request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.ensemble.member_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "ensemble.member_timeout_secs must be positive".to_string(),
            ));
        }
        if self.ensemble.chunk_size == 0 {
            return Err(ConfigError::Invalid("ensemble.chunk_size must be at least 1".to_string()));
        }
        if !(1..=MAX_SHORT_TERM_DAYS).contains(&self.risk.short_term_days) {
            return Err(ConfigError::Invalid(format!(
                "risk.short_term_days must be between 1 and {}",
                MAX_SHORT_TERM_DAYS
            )));
        }
        if self.cache.ttl_minutes == 0 {
            return Err(ConfigError::Invalid("cache.ttl_minutes must be positive".to_string()));
        }
        Ok(())
    }
}

/// Picks the configuration file: explicit path, then the environment value,
/// then `fallback` if it exists on disk.
pub fn resolve_path(explicit: Option<&Path>, env_value: Option<&str>, fallback: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(value) = env_value.map(str::trim).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(value));
    }
    fallback.exists().then(|| fallback.to_path_buf())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
