//! [`ModeTimers`] – per-mode timing state.
//!
//! Reset only by [`Autopilot::set_mode`][crate::autopilot::Autopilot], read
//! by the reference generators of the active mode.

use chrono::{DateTime, Utc};

use crate::clock::seconds_between;

#[derive(Debug, Clone, PartialEq)]
pub struct ModeTimers {
    switched_at: DateTime<Utc>,
    first_tick: bool,
    ramp_down: Option<RampDown>,
}

/// Latched propeller ramp-down: when it started and which thrust it decays from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampDown {
    pub started_at: DateTime<Utc>,
    pub initial_thrust: f64,
}

impl ModeTimers {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            switched_at: now,
            first_tick: true,
            ramp_down: None,
        }
    }

    /// Stamp a mode switch at `now` and re-arm the first-tick latch.
    pub(crate) fn restart(&mut self, now: DateTime<Utc>) {
        self.switched_at = now;
        self.first_tick = true;
        self.ramp_down = None;
    }

    /// Returns `true` exactly once after each [`restart`][Self::restart].
    pub(crate) fn take_first_tick(&mut self) -> bool {
        std::mem::replace(&mut self.first_tick, false)
    }

    pub fn switched_at(&self) -> DateTime<Utc> {
        self.switched_at
    }

    pub fn is_first_tick(&self) -> bool {
        self.first_tick
    }

    /// Seconds since the last mode switch.
    pub fn time_in_state(&self, now: DateTime<Utc>) -> f64 {
        seconds_between(now, self.switched_at)
    }

    /// Latch the ramp-down unless it is already latched.
    pub(crate) fn latch_ramp_down(&mut self, now: DateTime<Utc>, initial_thrust: f64) {
        if self.ramp_down.is_none() {
            self.ramp_down = Some(RampDown {
                started_at: now,
                initial_thrust,
            });
        }
    }

    pub(crate) fn clear_ramp_down(&mut self) {
        self.ramp_down = None;
    }

    pub fn ramp_down(&self) -> Option<RampDown> {
        self.ramp_down
    }
}
