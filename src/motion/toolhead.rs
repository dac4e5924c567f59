// src/motion/toolhead.rs - Shared print timeline
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::config::ToolheadConfig;
use crate::motion::stepper::{SharedActuator, SharedTrapQ};
use crate::motion::trapq::TrapQ;
use crate::motion::{lock, MotionError};

/// Seconds of retired moves kept in the toolhead queue history.
const HISTORY_EXPIRE: f64 = 30.0;

/// The process-wide timeline every actuator is scheduled against.
#[async_trait]
pub trait MotionTimeline: Send + Sync {
    /// Generate all pending steps on every registered stepper.
    fn flush_step_generation(&self) -> Result<(), MotionError>;

    /// Time at which the next move may start.
    fn get_last_move_time(&self) -> Result<f64, MotionError>;

    /// Extend the busy horizon to at least `kin_time`.
    fn note_kinematic_activity(&self, kin_time: f64) -> Result<(), MotionError>;

    /// Advance the timeline by `delay` seconds past the last move.
    fn dwell(&self, delay: f64) -> Result<(), MotionError>;

    /// Resolve once every queued move on every actuator has completed.
    async fn wait_moves(&self) -> Result<(), MotionError>;
}

#[derive(Debug, Default)]
struct TimelineState {
    print_time: f64,
    need_flush_time: f64,
    last_flush_time: f64,
}

impl TimelineState {
    fn horizon(&self) -> f64 {
        self.print_time.max(self.need_flush_time)
    }
}

/// Simulated MCU clock as published to waiters.
#[derive(Debug, Clone, Copy, Default)]
struct ClockState {
    print_time: f64,
    /// Set once [`Toolhead::run_clock`] has exited.
    stopped: bool,
}

/// Timeline backed by a simulated MCU clock.
///
/// The estimated print time only moves forward through
/// [`Toolhead::advance_clock`] or the [`Toolhead::run_clock`] task.
pub struct Toolhead {
    buffer_time_start: f64,
    clock_rate: f64,
    trapq: SharedTrapQ,
    steppers: Mutex<Vec<SharedActuator>>,
    state: Mutex<TimelineState>,
    clock_tx: watch::Sender<ClockState>,
}

impl Toolhead {
    pub fn new(config: &ToolheadConfig) -> Self {
        let (clock_tx, _) = watch::channel(ClockState::default());
        Self {
            buffer_time_start: config.buffer_time_start,
            clock_rate: config.clock_rate,
            trapq: Arc::new(Mutex::new(TrapQ::new())),
            steppers: Mutex::new(Vec::new()),
            state: Mutex::new(TimelineState::default()),
            clock_tx,
        }
    }

    /// Queue shared by the steppers that follow the toolhead.
    pub fn trapq(&self) -> SharedTrapQ {
        self.trapq.clone()
    }

    pub fn register_stepper(&self, stepper: SharedActuator) -> Result<(), MotionError> {
        lock(&self.steppers, "toolhead steppers")?.push(stepper);
        Ok(())
    }

    pub fn estimated_print_time(&self) -> f64 {
        self.clock_tx.borrow().print_time
    }

    /// Latest time any queued motion is known to run until.
    pub fn kinematic_horizon(&self) -> Result<f64, MotionError> {
        Ok(lock(&self.state, "toolhead")?.horizon())
    }

    pub fn last_flush_time(&self) -> Result<f64, MotionError> {
        Ok(lock(&self.state, "toolhead")?.last_flush_time)
    }

    pub fn is_busy(&self) -> Result<bool, MotionError> {
        Ok(self.estimated_print_time() < self.kinematic_horizon()?)
    }

    /// Move the simulated clock forward to `print_time`. Never moves it back.
    pub fn advance_clock(&self, print_time: f64) {
        self.clock_tx.send_if_modified(|clock| {
            if print_time > clock.print_time {
                clock.print_time = print_time;
                true
            } else {
                false
            }
        });
    }

    pub fn is_clock_stopped(&self) -> bool {
        self.clock_tx.borrow().stopped
    }

    fn set_clock_stopped(&self, stopped: bool) {
        self.clock_tx.send_if_modified(|clock| {
            let changed = clock.stopped != stopped;
            clock.stopped = stopped;
            changed
        });
    }

    /// Drive the simulated clock in real time until `shutdown` fires.
    ///
    /// Once this returns, pending and future waits that the clock has not
    /// already satisfied fail with [`MotionError::ClockStopped`].
    pub async fn run_clock(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        self.set_clock_stopped(false);
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("Toolhead clock shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last).as_secs_f64();
                    last = now;
                    self.advance_clock(self.estimated_print_time() + elapsed * self.clock_rate);
                }
            }
        }
        self.set_clock_stopped(true);
    }
}

#[async_trait]
impl MotionTimeline for Toolhead {
    fn flush_step_generation(&self) -> Result<(), MotionError> {
        let flush_time = lock(&self.state, "toolhead")?.horizon();
        let steppers = lock(&self.steppers, "toolhead steppers")?.clone();
        for stepper in &steppers {
            stepper.generate_steps(flush_time)?;
        }
        lock(&*self.trapq, "toolhead trapq")?.finalize_moves(flush_time, flush_time - HISTORY_EXPIRE);
        lock(&self.state, "toolhead")?.last_flush_time = flush_time;
        tracing::trace!("Flushed step generation up to {:.6}", flush_time);
        Ok(())
    }

    fn get_last_move_time(&self) -> Result<f64, MotionError> {
        let est_print_time = self.estimated_print_time();
        let mut state = lock(&self.state, "toolhead")?;
        if est_print_time >= state.horizon() {
            // Idle: leave room for the host to get the next move out
            state.print_time = state.print_time.max(est_print_time + self.buffer_time_start);
        }
        state.print_time = state.print_time.max(state.need_flush_time);
        Ok(state.print_time)
    }

    fn note_kinematic_activity(&self, kin_time: f64) -> Result<(), MotionError> {
        let mut state = lock(&self.state, "toolhead")?;
        state.need_flush_time = state.need_flush_time.max(kin_time);
        Ok(())
    }

    fn dwell(&self, delay: f64) -> Result<(), MotionError> {
        let next_print_time = self.get_last_move_time()? + delay.max(0.0);
        let mut state = lock(&self.state, "toolhead")?;
        state.print_time = state.print_time.max(next_print_time);
        Ok(())
    }

    async fn wait_moves(&self) -> Result<(), MotionError> {
        self.flush_step_generation()?;
        let horizon = self.kinematic_horizon()?;
        let mut clock_rx = self.clock_tx.subscribe();
        let reached = match clock_rx.wait_for(|clock| clock.print_time >= horizon || clock.stopped).await {
            Ok(clock) => clock.print_time >= horizon,
            Err(_) => false,
        };
        if !reached {
            tracing::warn!("Clock stopped before reaching {:.6}", horizon);
            return Err(MotionError::ClockStopped);
        }
        tracing::debug!("All moves completed at {:.6}", horizon);
        Ok(())
    }
}
