//! # Machine configuration
//!
//! The machine is described by a single TOML file. Every section is optional
//! and falls back to the defaults below.
//!
//! ```toml
//! [printer]
//! printer_name = "bench"
//!
//! [toolhead]
//! buffer_time_start = 0.25
//! clock_rate = 1.0
//!
//! [move_sync]
//! finalize_horizon = 99999.9
//!
//! [manual_stepper.feeder]
//! rotation_distance = 40.0
//! microsteps = 16
//!
//! [stepper.stepper_z]
//! axis = "z"
//! rotation_distance = 8.0
//! ```
//!
//! Manual steppers are registered as `manual_stepper <name>`; toolhead
//! steppers are registered under their bare section name.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::motion::Axis;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub toolhead: ToolheadConfig,
    #[serde(default)]
    pub move_sync: MoveSyncConfig,
    #[serde(default)]
    pub manual_stepper: HashMap<String, StepperConfig>,
    #[serde(default)]
    pub stepper: HashMap<String, AxisStepperConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PrinterConfig {
    #[serde(default)]
    pub printer_name: Option<String>,
}

/// Shared timeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolheadConfig {
    /// Lead time given to the first move after the toolhead goes idle (s).
    #[serde(default = "default_buffer_time_start")]
    pub buffer_time_start: f64,
    /// Simulated print seconds per wall-clock second.
    #[serde(default = "default_clock_rate")]
    pub clock_rate: f64,
}

impl Default for ToolheadConfig {
    fn default() -> Self {
        Self {
            buffer_time_start: default_buffer_time_start(),
            clock_rate: default_clock_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MoveSyncConfig {
    /// How far past a move's end its temporary queue is finalized (s).
    #[serde(default = "default_finalize_horizon")]
    pub finalize_horizon: f64,
}

impl Default for MoveSyncConfig {
    fn default() -> Self {
        Self {
            finalize_horizon: default_finalize_horizon(),
        }
    }
}

/// Stepper motor drive geometry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepperConfig {
    #[serde(default = "default_rotation_distance")]
    pub rotation_distance: f64,
    #[serde(default = "default_microsteps")]
    pub microsteps: u32,
    #[serde(default = "default_full_steps_per_rotation")]
    pub full_steps_per_rotation: u32,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            rotation_distance: default_rotation_distance(),
            microsteps: default_microsteps(),
            full_steps_per_rotation: default_full_steps_per_rotation(),
        }
    }
}

impl StepperConfig {
    /// Travel per step pulse (mm).
    pub fn step_dist(&self) -> f64 {
        self.rotation_distance / (self.full_steps_per_rotation as f64 * self.microsteps as f64)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if !(self.rotation_distance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "[{}] rotation_distance must be positive",
                section
            )));
        }
        if self.microsteps == 0 || self.full_steps_per_rotation == 0 {
            return Err(ConfigError::Invalid(format!(
                "[{}] microsteps and full_steps_per_rotation must be non-zero",
                section
            )));
        }
        Ok(())
    }
}

/// A stepper that follows one toolhead axis.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisStepperConfig {
    pub axis: Axis,
    #[serde(flatten)]
    pub drive: StepperConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.toolhead.buffer_time_start >= 0.0) {
            return Err(ConfigError::Invalid(
                "[toolhead] buffer_time_start must not be negative".to_string(),
            ));
        }
        if !(self.toolhead.clock_rate > 0.0) {
            return Err(ConfigError::Invalid(
                "[toolhead] clock_rate must be positive".to_string(),
            ));
        }
        if !(self.move_sync.finalize_horizon >= 0.0) {
            return Err(ConfigError::Invalid(
                "[move_sync] finalize_horizon must not be negative".to_string(),
            ));
        }
        for (name, stepper) in &self.manual_stepper {
            stepper.validate(&format!("manual_stepper {}", name))?;
        }
        for (name, stepper) in &self.stepper {
            stepper.drive.validate(name)?;
            if self.manual_stepper.contains_key(name) {
                tracing::warn!("Stepper '{}' is also defined as a manual stepper", name);
            }
        }
        Ok(())
    }
}

fn default_buffer_time_start() -> f64 { 0.250 }
fn default_clock_rate() -> f64 { 1.0 }
fn default_finalize_horizon() -> f64 { 99999.9 }
fn default_rotation_distance() -> f64 { 40.0 }
fn default_microsteps() -> u32 { 16 }
fn default_full_steps_per_rotation() -> u32 { 200 }

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
