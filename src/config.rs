//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and every field has a default, so an empty file (or no
//! file at all, via [`Config::default`]) yields a working configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{GroundError, Result};
use crate::safety::esc_reset::EscResetProfile;
use crate::safety::switch_monitor::SwitchThresholds;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub switch: SwitchConfig,

    #[serde(default)]
    pub motors: MotorsConfig,

    #[serde(default)]
    pub esc_reset: EscResetConfig,

    #[serde(default)]
    pub battery: BatteryConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Vehicle link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Motor command transmit rate
    #[serde(default = "default_send_hz")]
    pub send_hz: u32,

    /// Telemetry refresh rate towards the user interface
    #[serde(default = "default_ui_fps")]
    pub ui_fps: u32,

    #[serde(default = "default_handshake_on_connect")]
    pub handshake_on_connect: bool,

    #[serde(default = "default_banner_timeout_ms")]
    pub banner_timeout_ms: u64,

    /// Longest a single write to the vehicle may block before the link is
    /// treated as lost
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Arm switch inference thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct SwitchConfig {
    #[serde(default = "default_on_volts")]
    pub on_volts: f32,

    #[serde(default = "default_off_volts")]
    pub off_volts: f32,
}

/// Motor power limits
#[derive(Debug, Deserialize, Clone)]
pub struct MotorsConfig {
    /// Ceiling for manual power and the ESC reset high point
    #[serde(default = "default_full_power")]
    pub full_power: u8,

    #[serde(default = "default_spin_check_power")]
    pub spin_check_power: u8,

    /// Default increment for `up`/`down`
    #[serde(default = "default_ramp_step")]
    pub ramp_step: u8,
}

/// ESC reset timing
#[derive(Debug, Deserialize, Clone)]
pub struct EscResetConfig {
    #[serde(default = "default_step_interval_ms")]
    pub step_interval_ms: u64,

    #[serde(default = "default_hold_steps")]
    pub full_power_steps: u32,

    #[serde(default = "default_hold_steps")]
    pub zero_power_steps: u32,

    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Battery gauge configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BatteryConfig {
    #[serde(default = "default_cells")]
    pub cells: u8,

    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f32,
}

/// Telemetry recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_telemetry_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Diagnostic log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily-rolling log file directory; console only when empty
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_host() -> String { "192.168.4.1".to_string() }
fn default_port() -> u16 { 2323 }
fn default_connect_timeout_ms() -> u64 { 3000 }
fn default_send_hz() -> u32 { 30 }
fn default_ui_fps() -> u32 { 30 }
fn default_handshake_on_connect() -> bool { true }
fn default_banner_timeout_ms() -> u64 { 1000 }
fn default_write_timeout_ms() -> u64 { 500 }

fn default_on_volts() -> f32 { 8.0 }
fn default_off_volts() -> f32 { 5.0 }

fn default_full_power() -> u8 { 180 }
fn default_spin_check_power() -> u8 { 5 }
fn default_ramp_step() -> u8 { 1 }

fn default_step_interval_ms() -> u64 { 700 }
fn default_hold_steps() -> u32 { 9 }
fn default_prompt_timeout_ms() -> u64 { 30_000 }
fn default_tick_ms() -> u64 { 100 }

fn default_cells() -> u8 { 3 }
fn default_ema_alpha() -> f32 { 0.5 }

fn default_telemetry_enabled() -> bool { false }
fn default_telemetry_log_dir() -> String { "./telemetry".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_format() -> String { "jsonl".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_hz: default_send_hz(),
            ui_fps: default_ui_fps(),
            handshake_on_connect: default_handshake_on_connect(),
            banner_timeout_ms: default_banner_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            on_volts: default_on_volts(),
            off_volts: default_off_volts(),
        }
    }
}

impl Default for MotorsConfig {
    fn default() -> Self {
        Self {
            full_power: default_full_power(),
            spin_check_power: default_spin_check_power(),
            ramp_step: default_ramp_step(),
        }
    }
}

impl Default for EscResetConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: default_step_interval_ms(),
            full_power_steps: default_hold_steps(),
            zero_power_steps: default_hold_steps(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            cells: default_cells(),
            ema_alpha: default_ema_alpha(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_telemetry_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            format: default_log_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(self.banner_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Interval between motor commands
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.send_hz as f64)
    }

    /// Interval between UI refreshes
    pub fn ui_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.ui_fps as f64)
    }
}

impl SwitchConfig {
    pub fn thresholds(&self) -> SwitchThresholds {
        SwitchThresholds::new(self.on_volts, self.off_volts)
    }
}

impl EscResetConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

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
    /// use quad_ground::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// ESC reset profile built from the `[motors]` and `[esc_reset]` sections
    pub fn esc_reset_profile(&self) -> EscResetProfile {
        EscResetProfile {
            full_power: self.motors.full_power,
            spin_check_power: self.motors.spin_check_power,
            step_interval: Duration::from_millis(self.esc_reset.step_interval_ms),
            full_power_steps: self.esc_reset.full_power_steps,
            zero_power_steps: self.esc_reset.zero_power_steps,
            prompt_timeout: Duration::from_millis(self.esc_reset.prompt_timeout_ms),
        }
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
    pub fn validate(&self) -> Result<()> {
        // Link
        if self.link.host.trim().is_empty() {
            return Err(invalid("link host cannot be empty"));
        }

        if self.link.port == 0 {
            return Err(invalid("link port must be greater than 0"));
        }

        if self.link.connect_timeout_ms == 0 || self.link.connect_timeout_ms > 60000 {
            return Err(invalid("connect_timeout_ms must be between 1 and 60000"));
        }

        if self.link.send_hz == 0 || self.link.send_hz > 500 {
            return Err(invalid("send_hz must be between 1 and 500"));
        }

        if self.link.ui_fps == 0 || self.link.ui_fps > 240 {
            return Err(invalid("ui_fps must be between 1 and 240"));
        }

        if self.link.banner_timeout_ms == 0 || self.link.banner_timeout_ms > 10000 {
            return Err(invalid("banner_timeout_ms must be between 1 and 10000"));
        }

        if self.link.write_timeout_ms == 0 || self.link.write_timeout_ms > 10000 {
            return Err(invalid("write_timeout_ms must be between 1 and 10000"));
        }

        // Switch thresholds need a dead band between them
        if !self.switch.off_volts.is_finite()
            || !self.switch.on_volts.is_finite()
            || self.switch.off_volts < 0.0
        {
            return Err(invalid("switch thresholds must be finite and non-negative"));
        }

        if self.switch.off_volts >= self.switch.on_volts {
            return Err(invalid("switch off_volts must be less than on_volts"));
        }

        // Motors
        if self.motors.full_power == 0 {
            return Err(invalid("full_power must be greater than 0"));
        }

        if self.motors.spin_check_power > self.motors.full_power {
            return Err(invalid("spin_check_power must not exceed full_power"));
        }

        if self.motors.ramp_step == 0 {
            return Err(invalid("ramp_step must be greater than 0"));
        }

        // ESC reset
        if self.esc_reset.step_interval_ms == 0 || self.esc_reset.step_interval_ms > 10000 {
            return Err(invalid("step_interval_ms must be between 1 and 10000"));
        }

        if self.esc_reset.full_power_steps == 0 || self.esc_reset.zero_power_steps == 0 {
            return Err(invalid("ESC reset hold steps must be greater than 0"));
        }

        if self.esc_reset.prompt_timeout_ms == 0 {
            return Err(invalid("prompt_timeout_ms must be greater than 0"));
        }

        if self.esc_reset.tick_ms == 0 || self.esc_reset.tick_ms > self.esc_reset.step_interval_ms {
            return Err(invalid("tick_ms must be between 1 and step_interval_ms"));
        }

        // Battery
        if self.battery.cells == 0 || self.battery.cells > 12 {
            return Err(invalid("battery cells must be between 1 and 12"));
        }

        if !(self.battery.ema_alpha > 0.0 && self.battery.ema_alpha <= 1.0) {
            return Err(invalid("ema_alpha must be in (0.0, 1.0]"));
        }

        // Telemetry recording
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("telemetry format must be 'jsonl' (only supported format)"));
        }

        // Logging
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> GroundError {
    GroundError::Config(toml::de::Error::custom(message))
}
