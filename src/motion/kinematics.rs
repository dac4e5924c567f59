// src/motion/kinematics.rs
//! Stepper kinematics: position mappings and the iterative step solver.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::motion::trapq::{Coord, Move, TrajectoryQueue};
use crate::motion::{lock, MotionError};

/// Window scanned per iteration while looking for the next step crossing.
const SEEK_TIME: f64 = 0.000_100;
/// Bisection stops once a step time is known to within this many seconds.
const STEP_TIME_TOLERANCE: f64 = 0.000_000_001;

/// Cartesian axis a single-axis mapping follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Converts a point on the toolhead timeline into an actuator position.
pub trait KinematicMapping: Send + Sync {
    /// Actuator position for a cartesian coordinate.
    fn coord_position(&self, coord: &Coord) -> f64;

    /// Actuator position `move_time` seconds into `m`.
    fn calc_position(&self, m: &Move, move_time: f64) -> f64 {
        self.coord_position(&m.get_coord(move_time))
    }
}

/// Follows exactly one cartesian axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartesianAxis {
    axis: Axis,
}

impl CartesianAxis {
    pub fn new(axis: Axis) -> Self {
        Self { axis }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }
}

impl KinematicMapping for CartesianAxis {
    fn coord_position(&self, coord: &Coord) -> f64 {
        match self.axis {
            Axis::X => coord.x,
            Axis::Y => coord.y,
            Axis::Z => coord.z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDir {
    Forward,
    Backward,
}

impl StepDir {
    pub fn sign(self) -> f64 {
        match self {
            StepDir::Forward => 1.0,
            StepDir::Backward => -1.0,
        }
    }
}

/// A single step pulse scheduled on the print timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepEvent {
    pub print_time: f64,
    pub dir: StepDir,
}

#[derive(Debug, Default)]
struct SolverState {
    commanded_pos: f64,
    last_flush_time: f64,
}

/// Per-stepper kinematic state: the mapping plus the solver bookkeeping
/// (commanded position and how far steps have been generated).
pub struct StepperKinematics {
    mapping: Box<dyn KinematicMapping>,
    state: Mutex<SolverState>,
}

impl fmt::Debug for StepperKinematics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepperKinematics").finish_non_exhaustive()
    }
}

impl StepperKinematics {
    pub fn new(mapping: impl KinematicMapping + 'static) -> Self {
        Self {
            mapping: Box::new(mapping),
            state: Mutex::new(SolverState::default()),
        }
    }

    pub fn cartesian(axis: Axis) -> Self {
        Self::new(CartesianAxis::new(axis))
    }

    pub fn commanded_position(&self) -> Result<f64, MotionError> {
        Ok(lock(&self.state, "stepper kinematics")?.commanded_pos)
    }

    pub fn last_flush_time(&self) -> Result<f64, MotionError> {
        Ok(lock(&self.state, "stepper kinematics")?.last_flush_time)
    }

    pub fn set_position(&self, coord: &Coord) -> Result<(), MotionError> {
        let mut state = lock(&self.state, "stepper kinematics")?;
        state.commanded_pos = self.mapping.coord_position(coord);
        Ok(())
    }

    /// Generate every step between the last flush and `flush_time` for the
    /// moves held in `tq`.
    pub fn generate_steps(
        &self,
        tq: &dyn TrajectoryQueue,
        step_dist: f64,
        flush_time: f64,
    ) -> Result<Vec<StepEvent>, MotionError> {
        let mut state = lock(&self.state, "stepper kinematics")?;
        let mut steps = Vec::new();
        let start_time = state.last_flush_time;
        if flush_time <= start_time {
            return Ok(steps);
        }
        if step_dist > 0.0 {
            for m in tq.moves_between(start_time, flush_time) {
                let abs_start = start_time.max(m.print_time);
                let abs_end = flush_time.min(m.end_time());
                self.gen_steps_range(&mut state, &m, abs_start, abs_end, step_dist, &mut steps);
            }
        }
        state.last_flush_time = flush_time;
        Ok(steps)
    }

    fn gen_steps_range(
        &self,
        state: &mut SolverState,
        m: &Move,
        abs_start: f64,
        abs_end: f64,
        step_dist: f64,
        steps: &mut Vec<StepEvent>,
    ) {
        let half_step = 0.5 * step_dist;
        let end = abs_end - m.print_time;
        let mut low = (abs_start - m.print_time).max(0.0);
        while low < end {
            let high = (low + SEEK_TIME).min(end);
            if high <= low {
                break;
            }
            let pos = self.mapping.calc_position(m, high);
            // One direction per window: a sampled position is fixed, so a
            // step taken must never qualify the opposite step.
            let dir = if pos >= state.commanded_pos + half_step {
                StepDir::Forward
            } else if pos < state.commanded_pos - half_step {
                StepDir::Backward
            } else {
                low = high;
                continue;
            };
            loop {
                let target = state.commanded_pos + dir.sign() * half_step;
                let due = match dir {
                    StepDir::Forward => pos >= target,
                    StepDir::Backward => pos < target,
                };
                if !due {
                    break;
                }
                let next_pos = state.commanded_pos + dir.sign() * step_dist;
                if next_pos == state.commanded_pos {
                    break;
                }
                let step_time = self.find_crossing(m, low, high, target, dir);
                steps.push(StepEvent {
                    print_time: m.print_time + step_time,
                    dir,
                });
                state.commanded_pos = next_pos;
                low = step_time;
            }
            low = high;
        }
    }

    fn find_crossing(&self, m: &Move, mut low: f64, mut high: f64, target: f64, dir: StepDir) -> f64 {
        while high - low > STEP_TIME_TOLERANCE {
            let mid = 0.5 * (low + high);
            if mid <= low || mid >= high {
                break;
            }
            let pos = self.mapping.calc_position(m, mid);
            let crossed = match dir {
                StepDir::Forward => pos >= target,
                StepDir::Backward => pos < target,
            };
            if crossed {
                high = mid;
            } else {
                low = mid;
            }
        }
        high
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::trapq::{TrapQ, TrapSegment};

    fn queue_with_move(distance: f64, axes_r: Coord) -> TrapQ {
        let mut tq = TrapQ::new();
        tq.append(&TrapSegment {
            print_time: 1.0,
            accel_t: 0.0,
            cruise_t: 1.0,
            decel_t: 0.0,
            start_pos: Coord::ORIGIN,
            axes_r,
            start_v: 0.0,
            cruise_v: distance,
            accel: 0.0,
        });
        tq
    }

    #[test]
    fn test_cartesian_axis_selects_component() {
        let c = Coord::new(1.0, 2.0, 3.0);
        assert_eq!(CartesianAxis::new(Axis::X).coord_position(&c), 1.0);
        assert_eq!(CartesianAxis::new(Axis::Y).coord_position(&c), 2.0);
        assert_eq!(CartesianAxis::new(Axis::Z).coord_position(&c), 3.0);
    }

    #[test]
    fn test_forward_steps_cover_distance() {
        let tq = queue_with_move(1.0, Coord::new(1.0, 0.0, 0.0));
        let sk = StepperKinematics::cartesian(Axis::X);
        let steps = sk.generate_steps(&tq, 0.1, 2.0).unwrap();
        assert_eq!(steps.len(), 10);
        assert!(steps.iter().all(|s| s.dir == StepDir::Forward));
        // First crossing at half a step: 0.05mm at 1mm/s
        assert!((steps[0].print_time - 1.05).abs() < 1e-6);
        assert!(steps.windows(2).all(|w| w[0].print_time < w[1].print_time));
        assert!((sk.commanded_position().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(sk.last_flush_time().unwrap(), 2.0);
    }

    #[test]
    fn test_reverse_steps() {
        let tq = queue_with_move(1.0, Coord::new(-1.0, 0.0, 0.0));
        let sk = StepperKinematics::cartesian(Axis::X);
        let steps = sk.generate_steps(&tq, 0.25, 2.0).unwrap();
        assert_eq!(steps.len(), 4);
        assert!(steps.iter().all(|s| s.dir == StepDir::Backward));
    }

    #[test]
    fn test_other_axis_generates_nothing() {
        let tq = queue_with_move(1.0, Coord::new(1.0, 0.0, 0.0));
        let sk = StepperKinematics::cartesian(Axis::Y);
        assert!(sk.generate_steps(&tq, 0.1, 2.0).unwrap().is_empty());
    }

    #[test]
    fn test_generation_is_incremental() {
        let tq = queue_with_move(1.0, Coord::new(1.0, 0.0, 0.0));
        let sk = StepperKinematics::cartesian(Axis::X);
        let first = sk.generate_steps(&tq, 0.1, 1.5).unwrap();
        let second = sk.generate_steps(&tq, 0.1, 2.0).unwrap();
        assert_eq!(first.len() + second.len(), 10);
        assert!(sk.generate_steps(&tq, 0.1, 2.0).unwrap().is_empty());
    }

    #[test]
    fn test_half_step_boundaries_do_not_oscillate() {
        // 0.01mm steps over a 10mm trapezoid sample positions that land
        // exactly on half-step boundaries
        let profile = crate::motion::calc_move_time(10.0, 5.0, 5.0);
        let mut tq = TrapQ::new();
        tq.append(&TrapSegment {
            print_time: 0.25,
            accel_t: profile.accel_t,
            cruise_t: profile.cruise_t,
            decel_t: profile.decel_t,
            start_pos: Coord::ORIGIN,
            axes_r: Coord::new(1.0, 0.0, 0.0),
            start_v: 0.0,
            cruise_v: profile.cruise_v,
            accel: profile.accel,
        });
        let sk = StepperKinematics::cartesian(Axis::X);
        let steps = sk.generate_steps(&tq, 0.01, 0.25 + profile.total_duration()).unwrap();
        assert_eq!(steps.len(), 1000);
        assert!(steps.iter().all(|s| s.dir == StepDir::Forward));
        assert!(steps.windows(2).all(|w| w[0].print_time <= w[1].print_time));
        assert!((sk.commanded_position().unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_far_future_move_terminates() {
        let mut tq = TrapQ::new();
        tq.append(&TrapSegment {
            print_time: 1e12,
            accel_t: 0.0,
            cruise_t: 1.0,
            decel_t: 0.0,
            start_pos: Coord::ORIGIN,
            axes_r: Coord::new(1.0, 0.0, 0.0),
            start_v: 0.0,
            cruise_v: 1.0,
            accel: 0.0,
        });
        let sk = StepperKinematics::cartesian(Axis::X);
        let steps = sk.generate_steps(&tq, 0.1, 1e12 + 1.0).unwrap();
        assert_eq!(steps.len(), 10);
        assert_eq!(sk.last_flush_time().unwrap(), 1e12 + 1.0);
    }
}
