// src/motion/mod.rs - Synchronized stepper motion
pub mod handle;
pub mod kinematics;
pub mod profile;
pub mod stepper;
pub mod sync;
pub mod toolhead;
pub mod trapq;

pub use handle::MotionHandle;
pub use kinematics::{Axis, CartesianAxis, KinematicMapping, StepDir, StepEvent, StepperKinematics};
pub use profile::{calc_move_time, TrapezoidalProfile};
pub use stepper::{Actuator, ManualStepper, PrinterStepper, SharedActuator, SharedKinematics, SharedTrapQ, Stepper};
pub use sync::{ActuatorMoveSpec, ActuatorReport, MoveReport, SyncController, SyncError, SyncPhase};
pub use toolhead::{MotionTimeline, Toolhead};
pub use trapq::{Coord, Move, TrajectoryQueue, TrapQ, TrapSegment};

use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
    #[error("Motion clock stopped before queued moves completed")]
    ClockStopped,
    #[error("Motion handle for '{0}' is not installed")]
    NotInstalled(String),
}

pub(crate) fn lock<'a, T: ?Sized>(
    mutex: &'a Mutex<T>,
    what: &'static str,
) -> Result<MutexGuard<'a, T>, MotionError> {
    mutex.lock().map_err(|_| MotionError::Poisoned(what))
}
