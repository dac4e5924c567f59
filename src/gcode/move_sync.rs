// src/gcode/move_sync.rs - MOVE_SYNC command
use std::sync::Arc;

use crate::gcode::{GCodeCommand, GCodeError};
use crate::motion::{ActuatorMoveSpec, MoveReport, SyncController};
use crate::printer::PrinterObject;

pub const MOVE_SYNC_HELP: &str = "Move several steppers at the same time";

/// `STEPPER` followed by one or more digits.
pub fn is_stepper_param(name: &str) -> bool {
    name.strip_prefix("STEPPER")
        .is_some_and(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
}

/// Arguments of one `MOVE_SYNC` line.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveSyncRequest {
    /// Object names, in the order the parameters were given.
    pub steppers: Vec<String>,
    pub distance: i64,
    pub speed: i64,
    pub accel: i64,
    pub wait: bool,
}

impl MoveSyncRequest {
    pub fn from_command(cmd: &GCodeCommand) -> Result<Self, GCodeError> {
        let mut steppers: Vec<String> = Vec::new();
        for (key, value) in &cmd.parameters {
            if is_stepper_param(key) && !steppers.contains(value) {
                steppers.push(value.clone());
            }
        }
        if steppers.is_empty() {
            return Err(GCodeError::NoSteppers(cmd.command.clone()));
        }
        Ok(Self {
            steppers,
            distance: cmd.get_int("DIST", None)?,
            speed: cmd.get_int("SPEED", Some(0))?,
            accel: cmd.get_int("ACCEL", Some(0))?,
            wait: cmd.get_int("WAIT", Some(1))? != 0,
        })
    }

    /// Resolve every named object to its first stepper.
    ///
    /// Fails on the first unknown or stepper-less name, before anything has
    /// been touched.
    pub fn resolve<F>(&self, lookup: F) -> Result<Vec<ActuatorMoveSpec>, GCodeError>
    where
        F: Fn(&str) -> Option<Arc<dyn PrinterObject>>,
    {
        self.steppers
            .iter()
            .map(|name| {
                let object = lookup(name).ok_or_else(|| GCodeError::UnknownObject(name.clone()))?;
                let actuator = object
                    .get_steppers()
                    .into_iter()
                    .next()
                    .ok_or_else(|| GCodeError::NotAStepper(name.clone()))?;
                Ok(ActuatorMoveSpec {
                    actuator,
                    distance: self.distance as f64,
                    max_speed: self.speed as f64,
                    max_accel: self.accel as f64,
                })
            })
            .collect()
    }
}

pub async fn cmd_move_sync<F>(
    controller: &SyncController,
    cmd: &GCodeCommand,
    lookup: F,
) -> Result<MoveReport, GCodeError>
where
    F: Fn(&str) -> Option<Arc<dyn PrinterObject>>,
{
    let request = MoveSyncRequest::from_command(cmd)?;
    let specs = request.resolve(lookup)?;
    tracing::debug!(
        "MOVE_SYNC {:?} DIST={} SPEED={} ACCEL={}",
        request.steppers,
        request.distance,
        request.speed,
        request.accel
    );
    Ok(controller.move_steppers(specs, request.wait).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{ManualStepper, SharedActuator};

    struct Fan;

    impl PrinterObject for Fan {
        fn get_steppers(&self) -> Vec<SharedActuator> {
            Vec::new()
        }
    }

    fn parse(line: &str) -> GCodeCommand {
        GCodeCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_stepper_param_names() {
        assert!(is_stepper_param("STEPPER1"));
        assert!(is_stepper_param("STEPPER12"));
        assert!(!is_stepper_param("STEPPER"));
        assert!(!is_stepper_param("STEPPER_A"));
        assert!(!is_stepper_param("XSTEPPER1"));
    }

    #[test]
    fn test_request_keeps_command_order() {
        let cmd = parse("MOVE_SYNC STEPPER2=b STEPPER1=a DIST=10 SPEED=5 ACCEL=2");
        let request = MoveSyncRequest::from_command(&cmd).unwrap();
        assert_eq!(request.steppers, vec!["b".to_string(), "a".to_string()]);
        assert_eq!((request.distance, request.speed, request.accel), (10, 5, 2));
        assert!(request.wait);
    }

    #[test]
    fn test_request_names_each_object_once() {
        let cmd = parse("MOVE_SYNC STEPPER1=a STEPPER2=b STEPPER3=a DIST=1");
        let request = MoveSyncRequest::from_command(&cmd).unwrap();
        assert_eq!(request.steppers, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_request_defaults_and_wait() {
        let cmd = parse("MOVE_SYNC STEPPER1=a DIST=3 WAIT=0");
        let request = MoveSyncRequest::from_command(&cmd).unwrap();
        assert_eq!((request.speed, request.accel), (0, 0));
        assert!(!request.wait);
    }

    #[test]
    fn test_request_errors() {
        let cmd = parse("MOVE_SYNC DIST=3");
        assert!(matches!(MoveSyncRequest::from_command(&cmd), Err(GCodeError::NoSteppers(_))));
        let cmd = parse("MOVE_SYNC STEPPER1=a");
        assert!(matches!(MoveSyncRequest::from_command(&cmd), Err(GCodeError::MissingParameter(_))));
        let cmd = parse("MOVE_SYNC STEPPER1=a DIST=1.5");
        assert!(matches!(MoveSyncRequest::from_command(&cmd), Err(GCodeError::InvalidInteger { .. })));
    }

    #[test]
    fn test_resolve_reports_unknown_and_stepperless_objects() {
        let manual: Arc<dyn PrinterObject> = Arc::new(ManualStepper::new("manual_stepper a", 0.01).unwrap());
        let fan: Arc<dyn PrinterObject> = Arc::new(Fan);
        let lookup = |name: &str| match name {
            "manual_stepper a" => Some(manual.clone()),
            "fan" => Some(fan.clone()),
            _ => None,
        };

        let cmd = parse("MOVE_SYNC STEPPER1=\"manual_stepper a\" DIST=10 SPEED=5");
        let specs = MoveSyncRequest::from_command(&cmd).unwrap().resolve(lookup).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].actuator.name(), "manual_stepper a");
        assert_eq!(specs[0].distance, 10.0);

        let cmd = parse("MOVE_SYNC STEPPER1=\"manual_stepper a\" STEPPER2=missing DIST=10");
        let result = MoveSyncRequest::from_command(&cmd).unwrap().resolve(lookup);
        assert!(matches!(result, Err(GCodeError::UnknownObject(name)) if name == "missing"));

        let cmd = parse("MOVE_SYNC STEPPER1=fan DIST=10");
        let result = MoveSyncRequest::from_command(&cmd).unwrap().resolve(lookup);
        assert!(matches!(result, Err(GCodeError::NotAStepper(name)) if name == "fan"));
    }
}
