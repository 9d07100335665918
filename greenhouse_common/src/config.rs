//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all greenhouse workspace applications.
//!
//! # Usage
//!
//! ```rust,no_run
//! use greenhouse_common::config::{ConfigLoader, ConfigError};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct AppConfig {
//!     shared: greenhouse_common::config::SharedConfig,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = AppConfig::load(Path::new("config.toml"))?;
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::consts;

/// Log level for configuration (replaces `log::Level`).
///
/// Serializes to lowercase strings: "trace", "debug", "info", "warn", "error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level verbosity.
    Trace,
    /// Debug-level verbosity.
    Debug,
    /// Info-level verbosity (default).
    Info,
    /// Warning-level verbosity.
    Warn,
    /// Error-level verbosity.
    Error,
}

impl LogLevel {
    /// The `tracing_subscriber::EnvFilter` directive for this level.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    /// An actuator descriptor failed validation.
    #[error("actuator '{id}' invalid: {reason}")]
    InvalidActuator {
        /// Offending actuator id.
        id: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Duplicate actuator id across descriptors.
    #[error("duplicate actuator id: {0}")]
    DuplicateActuatorId(String),

    /// No actuator descriptors were found in the configuration.
    #[error("no actuators defined in configuration")]
    NoActuatorsDefined,
}

/// Common configuration fields shared across all greenhouse applications.
///
/// This struct should be embedded in application-specific configuration
/// structs to provide consistent base configuration.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "greenhoused"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    pub service_name: String,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Calibration scheduling block (configuration shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Local hour (0-23) at which the daily calibration pass runs.
    #[serde(default = "default_daily_reset_hour")]
    pub daily_reset_hour: u8,

    /// Whether to force a calibration pass immediately at process start.
    #[serde(default)]
    pub on_startup: bool,
}

fn default_daily_reset_hour() -> u8 {
    consts::DEFAULT_DAILY_RESET_HOUR
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            daily_reset_hour: consts::DEFAULT_DAILY_RESET_HOUR,
            on_startup: false,
        }
    }
}

impl CalibrationConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daily_reset_hour > 23 {
            return Err(ConfigError::ValidationError(format!(
                "daily_reset_hour must be 0-23, got {}",
                self.daily_reset_hour
            )));
        }
        Ok(())
    }
}

/// UDP multicast bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Multicast group address.
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: String,

    /// UDP port.
    #[serde(default = "default_bus_port")]
    pub port: u16,

    /// Number of retransmissions per logical command.
    #[serde(default = "default_bus_repeat")]
    pub repeat: u8,

    /// Spacing between retransmissions [ms].
    #[serde(default = "default_bus_repeat_spacing_ms")]
    pub repeat_spacing_ms: u64,
}

fn default_multicast_addr() -> String {
    consts::DEFAULT_BUS_MULTICAST_ADDR.to_string()
}

fn default_bus_port() -> u16 {
    consts::DEFAULT_BUS_PORT
}

fn default_bus_repeat() -> u8 {
    consts::DEFAULT_BUS_REPEAT
}

fn default_bus_repeat_spacing_ms() -> u64 {
    consts::DEFAULT_BUS_REPEAT_SPACING_MS
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            multicast_addr: default_multicast_addr(),
            port: default_bus_port(),
            repeat: default_bus_repeat(),
            repeat_spacing_ms: default_bus_repeat_spacing_ms(),
        }
    }
}

/// State persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the persisted state snapshot file.
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_state_file() -> String {
    consts::DEFAULT_STATE_FILE.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

/// Per-(actuator, level) queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Bounded depth per `(actuator_id, level)` FIFO.
    #[serde(default = "default_queue_depth")]
    pub depth: usize,

    /// Time-to-live for a queued command before expiry [s].
    #[serde(default = "default_queue_ttl_sec")]
    pub queue_ttl_sec: u64,
}

fn default_queue_depth() -> usize {
    consts::COMMAND_QUEUE_DEPTH
}

fn default_queue_ttl_sec() -> u64 {
    consts::DEFAULT_QUEUE_TTL_SEC
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            depth: default_queue_depth(),
            queue_ttl_sec: default_queue_ttl_sec(),
        }
    }
}

/// Rain interlock configuration (spec.md §4.8): actuator ids treated as
/// roof windows for the rain-interlock check, downstream of a rain sensor
/// reading the Scheduler is told about separately (no sensor polling is
/// implemented here — out of scope, spec.md §1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RainConfig {
    #[serde(default)]
    pub roof_window_ids: Vec<String>,
}

/// Top-level application configuration, embedding [`SharedConfig`] plus the
/// greenhouse-specific sections. Actuator descriptors are loaded separately
/// by [`crate::registry::ActuatorRegistry`] since they are a list, not a
/// singleton section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub shared: SharedConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub rain: RainConfig,
}

impl AppConfig {
    /// Validate every embedded section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.calibration.validate()?;
        Ok(())
    }
}
