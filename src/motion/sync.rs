// src/motion/sync.rs - Synchronized start of independent steppers
//! Moves several steppers at once, all scheduled from one shared start time.
//!
//! Each stepper is temporarily driven through a private queue and a plain
//! X-axis kinematics (see [`MotionHandle`]), so steppers that normally follow
//! different kinematics can be moved together. Only the start and the overall
//! completion are synchronized: every stepper gets its own trapezoid.
//!
//! The move runs in a synthetic frame: positions are reset to the origin, so
//! the reported position of every participating stepper is only meaningful
//! again after it has been re-homed or re-positioned.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::MoveSyncConfig;
use crate::motion::handle::MotionHandle;
use crate::motion::profile::TrapezoidalProfile;
use crate::motion::stepper::SharedActuator;
use crate::motion::toolhead::MotionTimeline;
use crate::motion::trapq::Coord;
use crate::motion::MotionError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A synchronized move is already in progress")]
    Busy,
    #[error("Stepper '{0}' appears more than once in one synchronized move")]
    DuplicateActuator(String),
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
}

/// One participant of a synchronized move.
#[derive(Clone)]
pub struct ActuatorMoveSpec {
    pub actuator: SharedActuator,
    pub distance: f64,
    pub max_speed: f64,
    pub max_accel: f64,
}

impl fmt::Debug for ActuatorMoveSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActuatorMoveSpec")
            .field("actuator", &self.actuator.name())
            .field("distance", &self.distance)
            .field("max_speed", &self.max_speed)
            .field("max_accel", &self.max_accel)
            .finish()
    }
}

/// Progress of one `move_steppers` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Flushed,
    AllInstalled,
    PositionsReset,
    ProfilesComputed,
    AllAppended,
    AllGenerated,
    AllFinalized,
    AllRestored,
    NotifiedAndWaited,
    NotifiedNoWait,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActuatorReport {
    pub name: String,
    pub start_time: f64,
    pub end_time: f64,
    pub profile: TrapezoidalProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveReport {
    pub start_time: f64,
    pub actuators: Vec<ActuatorReport>,
    /// Last phase reached; tells a waited move from a scheduled one.
    pub phase: SyncPhase,
}

impl MoveReport {
    /// Time the last participant finishes.
    pub fn end_time(&self) -> f64 {
        self.actuators
            .iter()
            .map(|a| a.end_time)
            .fold(self.start_time, f64::max)
    }
}

/// Clears the in-progress flag when dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncController {
    toolhead: Arc<dyn MotionTimeline>,
    config: MoveSyncConfig,
    active: AtomicBool,
}

impl SyncController {
    pub fn new(toolhead: Arc<dyn MotionTimeline>, config: MoveSyncConfig) -> Self {
        Self {
            toolhead,
            config,
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<InFlight<'_>, SyncError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::Busy)?;
        Ok(InFlight(&self.active))
    }

    /// Start every move in `specs` at the same print time.
    ///
    /// With `wait` set this resolves only after the toolhead reports that all
    /// queued motion, not just these moves, has completed. On error every
    /// stepper that was already taken over gets its own queue and kinematics
    /// back before the error is returned.
    pub async fn move_steppers(&self, specs: Vec<ActuatorMoveSpec>, wait: bool) -> Result<MoveReport, SyncError> {
        let _in_flight = self.begin()?;
        check_distinct(&specs)?;
        let mut phase = SyncPhase::Idle;
        tracing::debug!("Synchronized move of {} steppers ({:?})", specs.len(), phase);

        self.toolhead.flush_step_generation()?;
        phase = advance(phase, SyncPhase::Flushed);

        // Every stepper is taken over before any position is touched
        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            handles.push(MotionHandle::install(spec)?);
        }
        phase = advance(phase, SyncPhase::AllInstalled);

        for handle in &handles {
            handle.actuator().set_position(Coord::ORIGIN)?;
        }
        phase = advance(phase, SyncPhase::PositionsReset);

        let profiles: Vec<TrapezoidalProfile> = handles.iter().map(MotionHandle::calc_move_time).collect();
        for (handle, profile) in handles.iter().zip(&profiles) {
            if profile.is_idle() && handle.spec().distance != 0.0 {
                tracing::warn!(
                    "{}: speed {} cannot cover distance {}, stepper will not move",
                    handle.actuator().name(),
                    handle.spec().max_speed,
                    handle.spec().distance
                );
            }
        }
        phase = advance(phase, SyncPhase::ProfilesComputed);

        let start_time = self.toolhead.get_last_move_time()?;
        for (handle, profile) in handles.iter().zip(&profiles) {
            handle.append_move(profile, start_time)?;
        }
        phase = advance(phase, SyncPhase::AllAppended);

        let mut end_times = Vec::with_capacity(handles.len());
        for (handle, profile) in handles.iter().zip(&profiles) {
            end_times.push(handle.generate_steps(profile, start_time)?);
        }
        phase = advance(phase, SyncPhase::AllGenerated);

        for (handle, &end_time) in handles.iter().zip(&end_times) {
            handle.finalize(end_time, self.config.finalize_horizon)?;
        }
        phase = advance(phase, SyncPhase::AllFinalized);

        let actuators: Vec<ActuatorReport> = handles
            .iter()
            .zip(&profiles)
            .zip(&end_times)
            .map(|((handle, &profile), &end_time)| ActuatorReport {
                name: handle.actuator().name().to_string(),
                start_time,
                end_time,
                profile,
            })
            .collect();
        // Last installed, first restored
        while let Some(handle) = handles.pop() {
            handle.uninstall()?;
        }
        phase = advance(phase, SyncPhase::AllRestored);

        for &end_time in &end_times {
            self.toolhead.note_kinematic_activity(end_time)?;
        }
        self.toolhead.dwell(0.0)?;

        let end_time = end_times.iter().copied().fold(start_time, f64::max);
        tracing::info!(
            "Synchronized move of {} steppers scheduled {:.6} to {:.6}",
            actuators.len(),
            start_time,
            end_time
        );

        let phase = if wait {
            self.toolhead.wait_moves().await?;
            advance(phase, SyncPhase::NotifiedAndWaited)
        } else {
            advance(phase, SyncPhase::NotifiedNoWait)
        };
        Ok(MoveReport {
            start_time,
            actuators,
            phase,
        })
    }
}

/// Each actuator may take part at most once: a second takeover would park
/// the first private queue instead of the actuator's own.
fn check_distinct(specs: &[ActuatorMoveSpec]) -> Result<(), SyncError> {
    for (i, spec) in specs.iter().enumerate() {
        let addr = Arc::as_ptr(&spec.actuator) as *const ();
        if specs[..i].iter().any(|earlier| Arc::as_ptr(&earlier.actuator) as *const () == addr) {
            return Err(SyncError::DuplicateActuator(spec.actuator.name().to_string()));
        }
    }
    Ok(())
}

fn advance(from: SyncPhase, to: SyncPhase) -> SyncPhase {
    tracing::trace!("move_sync: {:?} -> {:?}", from, to);
    to
}
