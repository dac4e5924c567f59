// src/lib.rs - Synchronized multi-stepper moves
pub mod config;
pub mod gcode;
pub mod motion;
pub mod printer;

pub use config::{load_config, Config, ConfigError};
pub use gcode::{GCodeCommand, GCodeError};
pub use motion::{MotionError, MoveReport, SyncController, SyncError};
pub use printer::{CommandResponse, Printer, PrinterError, PrinterObject};
