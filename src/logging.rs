/// Structured logging for the hydrograph engine
///
/// Provides context-rich logging tagged with the emitting component and,
/// where relevant, the gauge identifier. Supports console output and
/// file-based logging. Until `init_logger` is called every log call is a
/// no-op, so the library stays silent when embedded without a binary.

use chrono::Utc;
use serde::Deserialize;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Normalizer,
    Rating,
    Stageflow,
    Ensemble,
    Percentile,
    Exceedance,
    Nwps,
    Hefs,
    Cache,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Normalizer => write!(f, "NORM"),
            Component::Rating => write!(f, "RATING"),
            Component::Stageflow => write!(f, "STAGEFLOW"),
            Component::Ensemble => write!(f, "ENSEMBLE"),
            Component::Percentile => write!(f, "PCTL"),
            Component::Exceedance => write!(f, "RISK"),
            Component::Nwps => write!(f, "NWPS"),
            Component::Hefs => write!(f, "HEFS"),
            Component::Cache => write!(f, "CACHE"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - gauge has no forecast, no ensemble run, or is seasonal
    Expected,
    /// Unexpected failure - indicates provider degradation or an API change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    fn log(&self, level: LogLevel, component: Component, gauge_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let gauge_part = gauge_id.map(|g| format!(" [{}]", g)).unwrap_or_default();
        let log_entry = format!("{} {} {}{}: {}", timestamp, level, component, gauge_part, message);

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warn => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", component, gauge_part, message),
                LogLevel::Warn => eprintln!("   ⚠ {}{}: {}", component, gauge_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}", message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize (or re-initialize) the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    let logger = Logger {
        min_level,
        log_file: log_file.map(String::from),
        console_timestamps,
    };
    // A poisoned lock only means another thread panicked mid-log; take it over.
    let mut slot = LOGGER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(logger);
}

fn emit(level: LogLevel, component: Component, gauge_id: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, component, gauge_id, message);
        }
    }
}

/// Log a general informational message
pub fn info(component: Component, gauge_id: Option<&str>, message: &str) {
    emit(LogLevel::Info, component, gauge_id, message);
}

/// Log a warning message
pub fn warn(component: Component, gauge_id: Option<&str>, message: &str) {
    emit(LogLevel::Warn, component, gauge_id, message);
}

/// Log an error message
pub fn error(component: Component, gauge_id: Option<&str>, message: &str) {
    emit(LogLevel::Error, component, gauge_id, message);
}

/// Log a debug message
pub fn debug(component: Component, gauge_id: Option<&str>, message: &str) {
    emit(LogLevel::Debug, component, gauge_id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a provider failure from its error text.
///
/// Missing forecasts and empty ensemble runs are routine for many gauges;
/// HTTP and parse failures point at the provider or at an API change.
pub fn classify_provider_failure(error_message: &str) -> FailureType {
    if error_message.contains("HTTP error: 404") || error_message.contains("No data available") {
        FailureType::Expected
    } else if error_message.contains("HTTP error")
        || error_message.contains("Parse error")
        || error_message.contains("timed out")
    {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a provider failure with automatic classification
pub fn log_provider_failure(
    component: Component,
    gauge_id: &str,
    operation: &str,
    err: &dyn std::error::Error,
) {
    let error_msg = err.to_string();
    let failure_type = classify_provider_failure(&error_msg);
    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(component, Some(gauge_id), &message),
        FailureType::Unexpected => error(component, Some(gauge_id), &message),
        FailureType::Unknown => warn(component, Some(gauge_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a batch fetch (e.g. ensemble members)
pub fn log_fetch_summary(component: Component, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Fetch complete: {}/{} successful, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info(component, None, &message);
    } else if successful == 0 {
        error(component, None, &message);
    } else {
        warn(component, None, &message);
    }
}
