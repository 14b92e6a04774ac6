//! [`AutopilotConfig`] – fixed-at-startup autopilot parameters.
//!
//! Every field except [`state_estimate_timeout`][AutopilotConfig::state_estimate_timeout]
//! is required; the runtime refuses to start when one is missing.  Durations
//! are in seconds, heights in metres, velocities in m/s and thrust is
//! mass-normalised (m/s²).

use chrono::TimeDelta;
use rotorpilot_types::PilotError;
use serde::{Deserialize, Serialize};

use crate::clock::delta_from_secs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotConfig {
    /// Whether the estimator reports velocity in the world frame (otherwise
    /// body frame).  Consumed by the predictor.
    pub velocity_estimate_in_world_frame: bool,
    /// Expected latency between issuing a command and it taking effect.
    pub control_command_delay: f64,
    /// Below this altitude the vehicle is considered on the ground: takeoff
    /// from above it skips straight to hover, and landing starts the
    /// propeller ramp-down once the predicted altitude drops under it.
    pub optitrack_land_drop_height: f64,
    /// Upper bound on the time spent in takeoff or landing.
    pub optitrack_start_land_timeout: f64,
    /// Takeoff target altitude.
    pub optitrack_start_height: f64,
    /// Time the rotors idle before the takeoff ramp begins.
    pub start_idle_duration: f64,
    /// Collective thrust during the idle window.
    pub idle_thrust: f64,
    /// Vertical reference speed for takeoff and landing.
    pub start_land_velocity: f64,
    /// Time to ramp the thrust from its last value down to zero.
    pub propeller_ramp_down_timeout: f64,
    /// When set, estimates older than this are invalid and the estimate
    /// watchdog trips after this long without a valid estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_estimate_timeout: Option<f64>,
}

impl AutopilotConfig {
    /// Check that every parameter is within its physical range.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Config`] naming the first offending parameter.
    pub fn validate(&self) -> Result<(), PilotError> {
        let checks: [(&str, f64, bool); 8] = [
            ("control_command_delay", self.control_command_delay, false),
            ("optitrack_land_drop_height", self.optitrack_land_drop_height, false),
            ("optitrack_start_land_timeout", self.optitrack_start_land_timeout, true),
            ("optitrack_start_height", self.optitrack_start_height, true),
            ("start_idle_duration", self.start_idle_duration, false),
            ("idle_thrust", self.idle_thrust, false),
            ("start_land_velocity", self.start_land_velocity, true),
            ("propeller_ramp_down_timeout", self.propeller_ramp_down_timeout, true),
        ];
        for (name, value, strictly_positive) in checks {
            check_range(name, value, strictly_positive)?;
        }
        if let Some(timeout) = self.state_estimate_timeout {
            check_range("state_estimate_timeout", timeout, true)?;
        }
        Ok(())
    }

    pub fn command_delay(&self) -> TimeDelta {
        delta_from_secs(self.control_command_delay)
    }

    pub fn estimate_timeout(&self) -> Option<TimeDelta> {
        self.state_estimate_timeout.map(delta_from_secs)
    }
}

fn check_range(name: &str, value: f64, strictly_positive: bool) -> Result<(), PilotError> {
    if !value.is_finite() {
        return Err(PilotError::Config(format!("{name} must be finite, got {value}")));
    }
    if strictly_positive && value <= 0.0 {
        return Err(PilotError::Config(format!("{name} must be > 0, got {value}")));
    }
    if value < 0.0 {
        return Err(PilotError::Config(format!("{name} must be >= 0, got {value}")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config() -> AutopilotConfig {
    AutopilotConfig {
        velocity_estimate_in_world_frame: true,
        control_command_delay: 0.05,
        optitrack_land_drop_height: 0.3,
        optitrack_start_land_timeout: 5.0,
        optitrack_start_height: 1.0,
        start_idle_duration: 0.5,
        idle_thrust: 2.0,
        start_land_velocity: 0.5,
        propeller_ramp_down_timeout: 1.0,
        state_estimate_timeout: None,
    }
}
