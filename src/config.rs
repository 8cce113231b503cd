//! # Changer Configuration
//!
//! Static configuration read once at startup: where the device server lives,
//! which motors to drive, the motion wait timeout and the polling rate.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! tango_server = "haspp02oh1:10000/"
//! timeout_ms = 120000
//! polling_rate_hz = 5
//!
//! [[motors]]
//! name = "ich_bin_ein_motor"
//! address = "p02/motor/elab.10"
//!
//! [[motors]]
//! name = "ich auch"
//! address = "p02/motor/elab.11"
//! ```
//!
//! The optional `[simulation]` table tunes the in-process stage used when no
//! control server is attached.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the changer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangerConfig {
    /// Prefix joined in front of every motor address.
    #[serde(default = "default_tango_server")]
    pub tango_server: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_polling_rate_hz")]
    pub polling_rate_hz: u32,
    #[serde(default)]
    pub motors: Vec<MotorConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for ChangerConfig {
    fn default() -> Self {
        Self {
            tango_server: default_tango_server(),
            timeout_ms: default_timeout_ms(),
            polling_rate_hz: default_polling_rate_hz(),
            motors: Vec::new(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// One motor as shown to the operator and addressed on the server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MotorConfig {
    pub name: String,
    pub address: String,
}

/// Parameters of the simulated stage.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SimulationConfig {
    #[serde(default = "default_steps_per_unit")]
    pub steps_per_unit: f64,
    /// Slew rate in steps per second.
    #[serde(default = "default_initial_speed")]
    pub initial_speed: f64,
    #[serde(default = "default_cw_limit")]
    pub cw_limit: i64,
    #[serde(default = "default_ccw_limit")]
    pub ccw_limit: i64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps_per_unit: default_steps_per_unit(),
            initial_speed: default_initial_speed(),
            cw_limit: default_cw_limit(),
            ccw_limit: default_ccw_limit(),
        }
    }
}

impl ChangerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.polling_rate_hz.max(1)))
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Full device address: server prefix followed by the motor's own address.
    pub fn device_address(&self, motor: &MotorConfig) -> String {
        format!("{}{}", self.tango_server, motor.address)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_rate_hz == 0 {
            return Err(ConfigError::Invalid("polling_rate_hz must be > 0".to_string()));
        }
        if self.polling_rate_hz > 1000 {
            return Err(ConfigError::Invalid("polling_rate_hz must be <= 1000".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be > 0".to_string()));
        }
        if self.motors.is_empty() {
            return Err(ConfigError::Invalid("at least one motor must be configured".to_string()));
        }
        for (index, motor) in self.motors.iter().enumerate() {
            if motor.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("motor #{} has an empty name", index)));
            }
            if motor.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("motor '{}' has an empty address", motor.name)));
            }
        }
        let sim = &self.simulation;
        if !(sim.steps_per_unit.is_finite() && sim.steps_per_unit > 0.0) {
            return Err(ConfigError::Invalid("simulation.steps_per_unit must be > 0".to_string()));
        }
        if !(sim.initial_speed.is_finite() && sim.initial_speed > 0.0) {
            return Err(ConfigError::Invalid("simulation.initial_speed must be > 0".to_string()));
        }
        if sim.ccw_limit >= sim.cw_limit {
            return Err(ConfigError::Invalid("simulation.ccw_limit must be below cw_limit".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_tango_server() -> String { "haspp02oh1:10000/".to_string() }
fn default_timeout_ms() -> u64 { 120_000 }
fn default_polling_rate_hz() -> u32 { 5 }
fn default_steps_per_unit() -> f64 { 1000.0 }
fn default_initial_speed() -> f64 { 2000.0 }
fn default_cw_limit() -> i64 { 100_000 }
fn default_ccw_limit() -> i64 { -100_000 }

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: impl AsRef<Path>) -> Result<ChangerConfig, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let config: ChangerConfig = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
