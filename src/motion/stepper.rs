// src/motion/stepper.rs - Host-side stepper state
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::motion::kinematics::{Axis, StepEvent, StepperKinematics};
use crate::motion::trapq::{Coord, TrajectoryQueue, TrapQ};
use crate::motion::{lock, MotionError};
use crate::printer::PrinterObject;

pub type SharedTrapQ = Arc<Mutex<dyn TrajectoryQueue>>;
pub type SharedKinematics = Arc<StepperKinematics>;
pub type SharedActuator = Arc<dyn Actuator>;

/// A linear actuator whose step generation can be driven from any
/// trajectory queue through any kinematics.
///
/// Both setters hand back whatever was installed before so callers can put
/// it back later.
pub trait Actuator: Send + Sync {
    fn name(&self) -> &str;

    fn set_trapq(&self, tq: Option<SharedTrapQ>) -> Result<Option<SharedTrapQ>, MotionError>;

    fn set_stepper_kinematics(&self, sk: SharedKinematics) -> Result<SharedKinematics, MotionError>;

    fn set_position(&self, coord: Coord) -> Result<(), MotionError>;

    /// Generate steps for everything queued up to `flush_time`.
    fn generate_steps(&self, flush_time: f64) -> Result<(), MotionError>;
}

struct StepperState {
    trapq: Option<SharedTrapQ>,
    kinematics: SharedKinematics,
    mcu_position_offset: f64,
    steps: Vec<StepEvent>,
}

pub struct Stepper {
    name: String,
    step_dist: f64,
    state: Mutex<StepperState>,
}

impl fmt::Debug for Stepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stepper")
            .field("name", &self.name)
            .field("step_dist", &self.step_dist)
            .finish_non_exhaustive()
    }
}

impl Stepper {
    pub fn new(name: impl Into<String>, step_dist: f64, axis: Axis) -> Self {
        Self {
            name: name.into(),
            step_dist,
            state: Mutex::new(StepperState {
                trapq: None,
                kinematics: Arc::new(StepperKinematics::cartesian(axis)),
                mcu_position_offset: 0.0,
                steps: Vec::new(),
            }),
        }
    }

    pub fn step_dist(&self) -> f64 {
        self.step_dist
    }

    pub fn trapq(&self) -> Result<Option<SharedTrapQ>, MotionError> {
        Ok(lock(&self.state, "stepper")?.trapq.clone())
    }

    pub fn stepper_kinematics(&self) -> Result<SharedKinematics, MotionError> {
        Ok(lock(&self.state, "stepper")?.kinematics.clone())
    }

    pub fn get_commanded_position(&self) -> Result<f64, MotionError> {
        let state = lock(&self.state, "stepper")?;
        state.kinematics.commanded_position()
    }

    /// Position in whole steps as the MCU would report it.
    pub fn get_mcu_position(&self) -> Result<i64, MotionError> {
        let state = lock(&self.state, "stepper")?;
        self.mcu_position(&state)
    }

    pub fn step_count(&self) -> Result<usize, MotionError> {
        Ok(lock(&self.state, "stepper")?.steps.len())
    }

    /// Drain the generated step events.
    pub fn take_steps(&self) -> Result<Vec<StepEvent>, MotionError> {
        Ok(std::mem::take(&mut lock(&self.state, "stepper")?.steps))
    }

    fn mcu_position(&self, state: &StepperState) -> Result<i64, MotionError> {
        let mcu_pos_dist = state.kinematics.commanded_position()? + state.mcu_position_offset;
        Ok((mcu_pos_dist / self.step_dist).round() as i64)
    }

    fn set_mcu_position(&self, state: &mut StepperState, mcu_pos: i64) -> Result<(), MotionError> {
        let mcu_pos_dist = mcu_pos as f64 * self.step_dist;
        state.mcu_position_offset = mcu_pos_dist - state.kinematics.commanded_position()?;
        Ok(())
    }
}

impl Actuator for Stepper {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_trapq(&self, tq: Option<SharedTrapQ>) -> Result<Option<SharedTrapQ>, MotionError> {
        let mut state = lock(&self.state, "stepper")?;
        Ok(std::mem::replace(&mut state.trapq, tq))
    }

    fn set_stepper_kinematics(&self, sk: SharedKinematics) -> Result<SharedKinematics, MotionError> {
        let mut state = lock(&self.state, "stepper")?;
        let mcu_pos = self.mcu_position(&state)?;
        let old = std::mem::replace(&mut state.kinematics, sk);
        self.set_mcu_position(&mut state, mcu_pos)?;
        Ok(old)
    }

    fn set_position(&self, coord: Coord) -> Result<(), MotionError> {
        let mut state = lock(&self.state, "stepper")?;
        let mcu_pos = self.mcu_position(&state)?;
        state.kinematics.set_position(&coord)?;
        self.set_mcu_position(&mut state, mcu_pos)
    }

    fn generate_steps(&self, flush_time: f64) -> Result<(), MotionError> {
        let mut state = lock(&self.state, "stepper")?;
        let Some(tq) = state.trapq.clone() else {
            return Ok(());
        };
        let steps = {
            let queue = lock(&*tq, "trapq")?;
            state.kinematics.generate_steps(&*queue, self.step_dist, flush_time)?
        };
        if !steps.is_empty() {
            tracing::trace!("{}: generated {} steps up to {:.6}", self.name, steps.len(), flush_time);
        }
        state.steps.extend(steps);
        Ok(())
    }
}

/// A stepper driven outside the toolhead kinematics, with its own queue.
#[derive(Debug)]
pub struct ManualStepper {
    stepper: Arc<Stepper>,
}

impl ManualStepper {
    pub fn new(name: impl Into<String>, step_dist: f64) -> Result<Self, MotionError> {
        let stepper = Arc::new(Stepper::new(name, step_dist, Axis::X));
        let trapq: SharedTrapQ = Arc::new(Mutex::new(TrapQ::new()));
        stepper.set_trapq(Some(trapq))?;
        Ok(Self { stepper })
    }

    pub fn stepper(&self) -> &Arc<Stepper> {
        &self.stepper
    }
}

impl PrinterObject for ManualStepper {
    fn get_steppers(&self) -> Vec<SharedActuator> {
        vec![self.stepper.clone() as SharedActuator]
    }
}

/// A stepper that follows one toolhead axis from the toolhead queue.
#[derive(Debug)]
pub struct PrinterStepper {
    stepper: Arc<Stepper>,
}

impl PrinterStepper {
    pub fn new(name: impl Into<String>, step_dist: f64, axis: Axis, trapq: SharedTrapQ) -> Result<Self, MotionError> {
        let stepper = Arc::new(Stepper::new(name, step_dist, axis));
        stepper.set_trapq(Some(trapq))?;
        Ok(Self { stepper })
    }

    pub fn stepper(&self) -> &Arc<Stepper> {
        &self.stepper
    }
}

impl PrinterObject for PrinterStepper {
    fn get_steppers(&self) -> Vec<SharedActuator> {
        vec![self.stepper.clone() as SharedActuator]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::trapq::TrapSegment;

    fn x_move(print_time: f64, distance: f64) -> TrapSegment {
        TrapSegment {
            print_time,
            accel_t: 0.0,
            cruise_t: 1.0,
            decel_t: 0.0,
            start_pos: Coord::ORIGIN,
            axes_r: Coord::new(distance.signum(), 0.0, 0.0),
            start_v: 0.0,
            cruise_v: distance.abs(),
            accel: 0.0,
        }
    }

    #[test]
    fn test_set_trapq_returns_previous() {
        let manual = ManualStepper::new("feeder", 0.01).unwrap();
        let stepper = manual.stepper();
        let original = stepper.trapq().unwrap().unwrap();
        let replacement: SharedTrapQ = Arc::new(Mutex::new(TrapQ::new()));
        let prev = stepper.set_trapq(Some(replacement.clone())).unwrap().unwrap();
        assert!(Arc::ptr_eq(&prev, &original));
        let back = stepper.set_trapq(Some(prev)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&back, &replacement));
    }

    #[test]
    fn test_generate_steps_tracks_mcu_position() {
        let manual = ManualStepper::new("feeder", 0.01).unwrap();
        let stepper = manual.stepper();
        let tq = stepper.trapq().unwrap().unwrap();
        tq.lock().unwrap().append(&x_move(1.0, 1.0));
        stepper.generate_steps(2.0).unwrap();
        assert_eq!(stepper.step_count().unwrap(), 100);
        assert_eq!(stepper.get_mcu_position().unwrap(), 100);
    }

    #[test]
    fn test_kinematics_swap_keeps_mcu_position() {
        let manual = ManualStepper::new("feeder", 0.01).unwrap();
        let stepper = manual.stepper();
        stepper.set_position(Coord::new(5.0, 0.0, 0.0)).unwrap();
        let before = stepper.get_mcu_position().unwrap();

        let fresh = Arc::new(StepperKinematics::cartesian(Axis::X));
        let old = stepper.set_stepper_kinematics(fresh).unwrap();
        assert_eq!(stepper.get_mcu_position().unwrap(), before);
        assert_eq!(stepper.get_commanded_position().unwrap(), 0.0);

        stepper.set_stepper_kinematics(old).unwrap();
        assert_eq!(stepper.get_commanded_position().unwrap(), 5.0);
        assert_eq!(stepper.get_mcu_position().unwrap(), before);
    }

    #[test]
    fn test_stepper_without_queue_generates_nothing() {
        let stepper = Stepper::new("idle", 0.01, Axis::Z);
        stepper.generate_steps(10.0).unwrap();
        assert_eq!(stepper.step_count().unwrap(), 0);
    }
}
