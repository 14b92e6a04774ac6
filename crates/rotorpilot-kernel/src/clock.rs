//! Wall-clock sources.
//!
//! The [`Autopilot`][crate::autopilot::Autopilot] never reads ambient time;
//! every handler takes `now` as an argument.  The runtime obtains `now` from
//! a [`Clock`], which is [`SystemClock`] in production and [`ManualClock`]
//! when a test needs to replay a flight deterministically.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

/// A source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.  Clones share the same time.
///
/// # Example
///
/// ```
/// use chrono::{DateTime, TimeDelta, Utc};
/// use rotorpilot_kernel::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(DateTime::<Utc>::UNIX_EPOCH);
/// clock.advance(TimeDelta::milliseconds(20));
/// assert_eq!(clock.now(), DateTime::<Utc>::UNIX_EPOCH + TimeDelta::milliseconds(20));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Seconds elapsed from `earlier` to `later` (negative if `later` is before).
pub fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 * 1e-6,
        // Only reachable for spans of several hundred thousand years.
        None => delta.num_milliseconds() as f64 * 1e-3,
    }
}

/// Convert a duration in seconds into a [`TimeDelta`] with microsecond
/// resolution.
pub fn delta_from_secs(seconds: f64) -> TimeDelta {
    TimeDelta::microseconds((seconds * 1e6).round() as i64)
}
