//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::afhds3::host::{FailsafeChannel, FailsafeMode, RequestedMode, MAX_OUTPUT_CHANNELS};
use crate::afhds3::protocol::{EmiStandard, ModuleSlot, PhyMode, AFHDS3_MAX_CHANNELS};
use crate::error::{Afhds3Error, Result};

/// Baud rates AFHDS3 modules accept
const SUPPORTED_BAUD_RATES: [u32; 3] = [57_600, 115_200, 1_500_000];

/// Nominal mixer output range
const CHANNEL_VALUE_LIMIT: i32 = 1024;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub module: ModuleConfig,
    #[serde(default)]
    pub model: ModelConfig,
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Output tick period; one command frame per tick
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
}

/// RF module settings, mirrored into the host model for the configured slot
#[derive(Debug, Deserialize, Clone)]
pub struct ModuleConfig {
    #[serde(default = "default_slot")]
    pub slot: ModuleSlot,

    #[serde(default)]
    pub phy_mode: PhyMode,

    #[serde(default)]
    pub emi: EmiStandard,

    #[serde(default = "default_telemetry")]
    pub telemetry: bool,

    #[serde(default)]
    pub channels_start: u8,

    #[serde(default = "default_channels_count")]
    pub channels_count: u8,

    #[serde(default)]
    pub failsafe_mode: FailsafeMode,

    #[serde(default)]
    pub failsafe_channels: Vec<FailsafeChannel>,

    /// Mode requested at startup
    #[serde(default)]
    pub mode: RequestedMode,
}

/// Model configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelConfig {
    #[serde(default)]
    pub model_id: u8,

    /// Initial output of each logical channel
    #[serde(default)]
    pub channel_values: Vec<i32>,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub file_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: None,
        }
    }
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 1_500_000 }
fn default_tick_period_ms() -> u64 { 5 }

fn default_slot() -> ModuleSlot { ModuleSlot::External }
fn default_telemetry() -> bool { true }
fn default_channels_count() -> u8 { 8 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use afhds3_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate serial port configuration
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be one of: 57600, 115200, 1500000"));
        }

        if self.serial.tick_period_ms == 0 || self.serial.tick_period_ms > 100 {
            return Err(invalid("tick_period_ms must be between 1 and 100"));
        }

        // Validate module channel range
        if self.module.channels_start as usize >= MAX_OUTPUT_CHANNELS {
            return Err(invalid(format!(
                "channels_start must be between 0 and {}",
                MAX_OUTPUT_CHANNELS - 1
            )));
        }

        if self.module.channels_count == 0
            || self.module.channels_count as usize > AFHDS3_MAX_CHANNELS
        {
            return Err(invalid(format!(
                "channels_count must be between 1 and {}",
                AFHDS3_MAX_CHANNELS
            )));
        }

        if self.module.channels_start as usize + self.module.channels_count as usize
            > MAX_OUTPUT_CHANNELS
        {
            return Err(invalid(format!(
                "channels_start + channels_count must not exceed {}",
                MAX_OUTPUT_CHANNELS
            )));
        }

        if self.module.failsafe_channels.len() > MAX_OUTPUT_CHANNELS {
            return Err(invalid(format!(
                "failsafe_channels can hold at most {} entries",
                MAX_OUTPUT_CHANNELS
            )));
        }

        for (index, channel) in self.module.failsafe_channels.iter().enumerate() {
            if let FailsafeChannel::Value(value) = channel {
                if (*value as i32).abs() > CHANNEL_VALUE_LIMIT {
                    return Err(invalid(format!(
                        "failsafe_channels[{}] must be between -{} and {}",
                        index, CHANNEL_VALUE_LIMIT, CHANNEL_VALUE_LIMIT
                    )));
                }
            }
        }

        // Validate model
        if self.model.channel_values.len() > MAX_OUTPUT_CHANNELS {
            return Err(invalid(format!(
                "channel_values can hold at most {} entries",
                MAX_OUTPUT_CHANNELS
            )));
        }

        if self
            .model
            .channel_values
            .iter()
            .any(|value| value.abs() > CHANNEL_VALUE_LIMIT)
        {
            return Err(invalid(format!(
                "channel_values must be between -{} and {}",
                CHANNEL_VALUE_LIMIT, CHANNEL_VALUE_LIMIT
            )));
        }

        // Validate telemetry configuration
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        // Validate logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging level must be one of: trace, debug, info, warn, error",
            ));
        }

        if matches!(&self.logging.file_dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging file_dir cannot be empty when set"));
        }

        Ok(())
    }
}

fn invalid<T: std::fmt::Display>(msg: T) -> Afhds3Error {
    Afhds3Error::Config(toml::de::Error::custom(msg))
}
