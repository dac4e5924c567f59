// src/motion/handle.rs - Temporary takeover of one actuator
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::motion::kinematics::{Axis, StepperKinematics};
use crate::motion::profile::{calc_move_time, TrapezoidalProfile};
use crate::motion::stepper::{SharedActuator, SharedKinematics, SharedTrapQ};
use crate::motion::sync::ActuatorMoveSpec;
use crate::motion::trapq::{Coord, TrapQ, TrajectoryQueue, TrapSegment};
use crate::motion::{lock, MotionError};

struct Parked {
    trapq: Option<SharedTrapQ>,
    kinematics: SharedKinematics,
}

/// Drives one actuator through a private queue and a private X-axis
/// kinematics for the length of a synchronized move.
///
/// While installed the actuator's own queue and kinematics are parked inside
/// the handle. They are put back by [`MotionHandle::uninstall`], or by `Drop`
/// when the handle is discarded early.
pub struct MotionHandle {
    spec: ActuatorMoveSpec,
    trapq: Arc<Mutex<TrapQ>>,
    kinematics: SharedKinematics,
    parked: Option<Parked>,
}

impl fmt::Debug for MotionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotionHandle")
            .field("spec", &self.spec)
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl MotionHandle {
    /// Allocate the private queue and kinematics and swap them onto the
    /// actuator.
    pub fn install(spec: ActuatorMoveSpec) -> Result<Self, MotionError> {
        let trapq = Arc::new(Mutex::new(TrapQ::new()));
        let kinematics: SharedKinematics = Arc::new(StepperKinematics::cartesian(Axis::X));
        let actuator = spec.actuator.clone();

        let prev_kinematics = actuator.set_stepper_kinematics(kinematics.clone())?;
        let own_trapq: SharedTrapQ = trapq.clone();
        let prev_trapq = match actuator.set_trapq(Some(own_trapq)) {
            Ok(prev) => prev,
            Err(e) => {
                if let Err(restore_err) = actuator.set_stepper_kinematics(prev_kinematics) {
                    tracing::error!("{}: failed to restore kinematics: {}", actuator.name(), restore_err);
                }
                return Err(e);
            }
        };
        tracing::debug!("{}: installed synchronized-move queue", actuator.name());

        Ok(Self {
            spec,
            trapq,
            kinematics,
            parked: Some(Parked {
                trapq: prev_trapq,
                kinematics: prev_kinematics,
            }),
        })
    }

    pub fn actuator(&self) -> &SharedActuator {
        &self.spec.actuator
    }

    pub fn spec(&self) -> &ActuatorMoveSpec {
        &self.spec
    }

    pub fn is_installed(&self) -> bool {
        self.parked.is_some()
    }

    /// Queue owned by this handle.
    pub fn trapq(&self) -> SharedTrapQ {
        self.trapq.clone()
    }

    /// Kinematics owned by this handle.
    pub fn kinematics(&self) -> SharedKinematics {
        self.kinematics.clone()
    }

    pub fn calc_move_time(&self) -> TrapezoidalProfile {
        calc_move_time(self.spec.distance, self.spec.max_speed, self.spec.max_accel)
    }

    pub fn append_move(&self, profile: &TrapezoidalProfile, start_time: f64) -> Result<(), MotionError> {
        self.check_installed()?;
        let segment = TrapSegment {
            print_time: start_time,
            accel_t: profile.accel_t,
            cruise_t: profile.cruise_t,
            decel_t: profile.decel_t,
            start_pos: Coord::ORIGIN,
            axes_r: Coord::new(profile.axis_r, 0.0, 0.0),
            start_v: 0.0,
            cruise_v: profile.cruise_v,
            accel: profile.accel,
        };
        lock(&*self.trapq, "handle trapq")?.append(&segment);
        Ok(())
    }

    /// Generate this actuator's steps and return the time its move ends.
    pub fn generate_steps(&self, profile: &TrapezoidalProfile, start_time: f64) -> Result<f64, MotionError> {
        self.check_installed()?;
        let end_time = start_time + profile.total_duration();
        self.spec.actuator.generate_steps(end_time)?;
        Ok(end_time)
    }

    /// Retire everything in the private queue so it can be dropped.
    pub fn finalize(&self, end_time: f64, horizon: f64) -> Result<(), MotionError> {
        let finalize_time = end_time + horizon;
        lock(&*self.trapq, "handle trapq")?.finalize_moves(finalize_time, finalize_time);
        Ok(())
    }

    /// Give the actuator back its own queue and kinematics.
    pub fn uninstall(mut self) -> Result<(), MotionError> {
        self.restore()
    }

    fn check_installed(&self) -> Result<(), MotionError> {
        if self.parked.is_none() {
            return Err(MotionError::NotInstalled(self.spec.actuator.name().to_string()));
        }
        Ok(())
    }

    fn restore(&mut self) -> Result<(), MotionError> {
        let Some(parked) = self.parked.take() else {
            return Ok(());
        };
        let actuator = &self.spec.actuator;
        let trapq_result = actuator.set_trapq(parked.trapq).map(|_| ());
        let kinematics_result = actuator.set_stepper_kinematics(parked.kinematics).map(|_| ());
        tracing::debug!("{}: restored original queue and kinematics", actuator.name());
        trapq_result.and(kinematics_result)
    }
}

impl Drop for MotionHandle {
    fn drop(&mut self) {
        if self.parked.is_some() {
            tracing::warn!(
                "{}: synchronized move aborted, restoring original queue and kinematics",
                self.spec.actuator.name()
            );
            if let Err(e) = self.restore() {
                tracing::error!("{}: restore failed: {}", self.spec.actuator.name(), e);
            }
        }
    }
}
