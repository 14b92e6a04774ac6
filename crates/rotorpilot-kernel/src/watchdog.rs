//! [`EstimateWatchdog`] – estimator link monitor.
//!
//! An invalid estimate is handled inside the tick, but a silent estimator
//! never produces a tick at all.  The watchdog closes that gap: feed it a
//! [`heartbeat`][EstimateWatchdog::heartbeat] for every valid estimate and
//! [`poll`][EstimateWatchdog::poll] it from a supervisor timer.
//!
//! ```
//! use chrono::{DateTime, TimeDelta, Utc};
//! use rotorpilot_kernel::watchdog::{EstimateHealth, EstimateWatchdog};
//!
//! let t0 = DateTime::<Utc>::UNIX_EPOCH;
//! let mut wd = EstimateWatchdog::new(TimeDelta::milliseconds(100));
//! wd.heartbeat(t0);
//!
//! assert_eq!(wd.check(t0 + TimeDelta::milliseconds(50)), EstimateHealth::Healthy);
//! assert_eq!(wd.check(t0 + TimeDelta::milliseconds(150)), EstimateHealth::TimedOut);
//! ```

use chrono::{DateTime, TimeDelta, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateHealth {
    /// A valid estimate arrived within the timeout.
    Healthy,
    /// The last valid estimate is older than the timeout.
    TimedOut,
    /// No valid estimate has been seen yet.
    NeverReceived,
}

#[derive(Debug, Clone)]
pub struct EstimateWatchdog {
    timeout: TimeDelta,
    last_valid: Option<DateTime<Utc>>,
    tripped: bool,
}

impl EstimateWatchdog {
    pub fn new(timeout: TimeDelta) -> Self {
        Self {
            timeout,
            last_valid: None,
            tripped: false,
        }
    }

    pub fn timeout(&self) -> TimeDelta {
        self.timeout
    }

    /// Record the arrival of a valid estimate at `now` and re-arm the trip.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_valid = Some(now);
        self.tripped = false;
    }

    pub fn check(&self, now: DateTime<Utc>) -> EstimateHealth {
        match self.last_valid {
            None => EstimateHealth::NeverReceived,
            Some(t) if now - t <= self.timeout => EstimateHealth::Healthy,
            Some(_) => EstimateHealth::TimedOut,
        }
    }

    /// `true` on the first poll that observes [`EstimateHealth::TimedOut`]
    /// after a heartbeat; later polls stay quiet until the next heartbeat.
    ///
    /// A link that never delivered an estimate does not trip: the vehicle
    /// cannot have left `Off` without one.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        if self.tripped || self.check(now) != EstimateHealth::TimedOut {
            return false;
        }
        self.tripped = true;
        true
    }
}
