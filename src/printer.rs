// src/printer.rs - Printer object registry and command dispatch
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError};
use crate::gcode::move_sync::{self, MOVE_SYNC_HELP};
use crate::gcode::{GCodeCommand, GCodeError};
use crate::motion::{
    ManualStepper, MotionError, MotionTimeline, MoveReport, PrinterStepper, SharedActuator, SyncController, Toolhead,
};

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("GCode error: {0}")]
    GCode(#[from] GCodeError),
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
    #[error("Duplicate printer object '{0}'")]
    DuplicateObject(String),
}

/// Anything that can be looked up by name in the printer.
pub trait PrinterObject: Send + Sync {
    /// Steppers owned by this object, primary stepper first.
    fn get_steppers(&self) -> Vec<SharedActuator> {
        Vec::new()
    }
}

const COMMANDS: &[(&str, &str)] = &[
    ("HELP", "Report the list of available extended commands"),
    ("M400", "Wait for current moves to finish"),
    ("MOVE_SYNC", MOVE_SYNC_HELP),
];

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandResponse {
    Ok,
    Moved(MoveReport),
    Help { commands: Vec<(String, String)> },
}

pub struct Printer {
    config: Config,
    toolhead: Arc<Toolhead>,
    sync: SyncController,
    objects: HashMap<String, Arc<dyn PrinterObject>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Printer {
    pub fn new(config: Config) -> Result<Self, PrinterError> {
        config.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let toolhead = Arc::new(Toolhead::new(&config.toolhead));
        let timeline: Arc<dyn MotionTimeline> = toolhead.clone();
        let sync = SyncController::new(timeline, config.move_sync.clone());

        let mut printer = Self {
            config,
            toolhead,
            sync,
            objects: HashMap::new(),
            shutdown_tx,
        };

        let mut manual: Vec<_> = printer.config.manual_stepper.clone().into_iter().collect();
        manual.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, stepper_config) in manual {
            let name = format!("manual_stepper {}", name);
            let object = ManualStepper::new(name.clone(), stepper_config.step_dist())?;
            printer.toolhead.register_stepper(object.stepper().clone())?;
            printer.add_object(name, Arc::new(object))?;
        }

        let mut axis: Vec<_> = printer.config.stepper.clone().into_iter().collect();
        axis.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, stepper_config) in axis {
            let object = PrinterStepper::new(
                name.clone(),
                stepper_config.drive.step_dist(),
                stepper_config.axis,
                printer.toolhead.trapq(),
            )?;
            printer.toolhead.register_stepper(object.stepper().clone())?;
            printer.add_object(name, Arc::new(object))?;
        }

        tracing::info!(
            "Printer '{}' ready with {} objects",
            printer.config.printer.printer_name.as_deref().unwrap_or("unnamed"),
            printer.objects.len()
        );
        Ok(printer)
    }

    pub fn add_object(&mut self, name: impl Into<String>, object: Arc<dyn PrinterObject>) -> Result<(), PrinterError> {
        let name = name.into();
        if self.objects.contains_key(&name) {
            return Err(PrinterError::DuplicateObject(name));
        }
        tracing::debug!("Registered printer object '{}'", name);
        self.objects.insert(name, object);
        Ok(())
    }

    pub fn lookup_object(&self, name: &str) -> Option<Arc<dyn PrinterObject>> {
        self.objects.get(name).cloned()
    }

    pub fn object_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.objects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn toolhead(&self) -> &Arc<Toolhead> {
        &self.toolhead
    }

    pub fn sync_controller(&self) -> &SyncController {
        &self.sync
    }

    /// Spawn the task driving the simulated print clock.
    pub fn start_clock(&self) -> JoinHandle<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(self.toolhead.clone().run_clock(shutdown_rx))
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down printer");
        let _ = self.shutdown_tx.send(());
    }

    pub async fn process_gcode(&self, line: &str) -> Result<CommandResponse, PrinterError> {
        let result = self.dispatch(line).await;
        if let Err(e) = &result {
            tracing::error!("Command '{}' failed: {}", line.trim(), e);
        }
        result
    }

    async fn dispatch(&self, line: &str) -> Result<CommandResponse, PrinterError> {
        let Some(cmd) = GCodeCommand::parse(line)? else {
            return Ok(CommandResponse::Ok);
        };
        match cmd.command.as_str() {
            "MOVE_SYNC" => {
                let report = move_sync::cmd_move_sync(&self.sync, &cmd, |name| self.lookup_object(name)).await?;
                Ok(CommandResponse::Moved(report))
            }
            "M400" => {
                self.toolhead.wait_moves().await?;
                Ok(CommandResponse::Ok)
            }
            "HELP" => Ok(CommandResponse::Help {
                commands: COMMANDS
                    .iter()
                    .map(|(name, help)| (name.to_string(), help.to_string()))
                    .collect(),
            }),
            other => Err(GCodeError::UnknownCommand(other.to_string()).into()),
        }
    }
}
