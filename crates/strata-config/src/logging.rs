//! Structured logging utilities for Strata components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use strata_config::logging::*;
//!
//! log_store_info!("Opened file store", states = 3);
//! log_config_debug!("Loaded config layer", path = "/etc/strata.toml");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const STORE: &'static str = "STORE";
    pub const CONFIG: &'static str = "CONFIG";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ConfigError::Invalid(format!("unknown log level {other:?}"))),
        }
    }
}

// === STORE logging macros ===

#[macro_export]
macro_rules! log_store_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::STORE, $($key = $value,)* $msg)
    };
}

// === CONFIG logging macros ===

#[macro_export]
macro_rules! log_config_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CONFIG, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_config_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CONFIG, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
///
/// `RUST_LOG` takes precedence over `level` when set. Returns false if a
/// global subscriber was already installed.
pub fn init_logging(level: LogLevel) -> bool {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
        .is_ok();
    if installed {
        log_config_info!("Logging initialized", level = level.as_str());
    }
    installed
}
