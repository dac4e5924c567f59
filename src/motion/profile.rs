// src/motion/profile.rs - Trapezoidal move timing
use serde::Serialize;

/// Timing of a single-axis move that starts and ends at rest.
///
/// The deceleration phase always mirrors the acceleration phase, so
/// `decel_t == accel_t`. Durations are in seconds, `cruise_v` in mm/s and
/// `accel` in mm/s².
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrapezoidalProfile {
    /// Direction of travel along the axis (+1.0 or -1.0).
    pub axis_r: f64,
    pub accel_t: f64,
    pub cruise_t: f64,
    pub decel_t: f64,
    pub cruise_v: f64,
    pub accel: f64,
}

impl TrapezoidalProfile {
    pub const IDLE: TrapezoidalProfile = TrapezoidalProfile {
        axis_r: 1.0,
        accel_t: 0.0,
        cruise_t: 0.0,
        decel_t: 0.0,
        cruise_v: 0.0,
        accel: 0.0,
    };

    pub fn total_duration(&self) -> f64 {
        self.accel_t + self.cruise_t + self.decel_t
    }

    /// Unsigned distance covered by the profile.
    pub fn distance(&self) -> f64 {
        self.cruise_v * (self.accel_t + self.cruise_t)
    }

    pub fn is_idle(&self) -> bool {
        self.total_duration() == 0.0
    }
}

/// Compute the trapezoid covering `dist` with at most `speed` and `accel`.
///
/// Never fails: a zero distance or a non-positive speed yields an idle
/// profile, and a non-positive acceleration yields a constant-velocity move.
pub fn calc_move_time(dist: f64, speed: f64, accel: f64) -> TrapezoidalProfile {
    let axis_r = if dist < 0.0 { -1.0 } else { 1.0 };
    let dist = dist.abs();
    if dist == 0.0 || !(speed > 0.0) || !dist.is_finite() {
        return TrapezoidalProfile { axis_r, ..TrapezoidalProfile::IDLE };
    }
    if !(accel > 0.0) {
        return TrapezoidalProfile {
            axis_r,
            cruise_t: dist / speed,
            cruise_v: speed,
            ..TrapezoidalProfile::IDLE
        };
    }
    let max_cruise_v2 = dist * accel;
    let cruise_v = if speed * speed > max_cruise_v2 {
        max_cruise_v2.sqrt()
    } else {
        speed
    };
    let accel_t = cruise_v / accel;
    let accel_decel_d = accel_t * cruise_v;
    let cruise_t = ((dist - accel_decel_d) / cruise_v).max(0.0);
    TrapezoidalProfile {
        axis_r,
        accel_t,
        cruise_t,
        decel_t: accel_t,
        cruise_v,
        accel,
    }
}
