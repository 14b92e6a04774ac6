//! Startup configuration – reads `rotorpilot.toml`.
//!
//! ```toml
//! event_queue_capacity = 64        # optional
//! bus_capacity = 256               # optional
//!
//! [autopilot]
//! velocity_estimate_in_world_frame = true
//! control_command_delay = 0.05
//! optitrack_land_drop_height = 0.3
//! optitrack_start_land_timeout = 5.0
//! optitrack_start_height = 1.0
//! start_idle_duration = 2.0
//! idle_thrust = 2.0
//! start_land_velocity = 0.5
//! propeller_ramp_down_timeout = 1.5
//! state_estimate_timeout = 0.2     # optional, enables the watchdog
//! ```
//!
//! Unlike the optional runtime knobs, every `[autopilot]` parameter must be
//! present: the process refuses to start with partial configuration.

use rotorpilot_kernel::AutopilotConfig;
use rotorpilot_types::PilotError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub autopilot: AutopilotConfig,

    /// Inbound events buffered before producers have to wait.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Per-topic capacity of the outbound event bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_event_queue_capacity() -> usize {
    crate::service::DEFAULT_QUEUE_CAPACITY
}
fn default_bus_capacity() -> usize {
    256
}

impl RuntimeConfig {
    /// # Errors
    ///
    /// [`PilotError::Config`] for an out-of-range autopilot parameter or a
    /// zero capacity.
    pub fn validate(&self) -> Result<(), PilotError> {
        self.autopilot.validate()?;
        if self.event_queue_capacity == 0 {
            return Err(PilotError::Config("event_queue_capacity must be > 0".into()));
        }
        if self.bus_capacity == 0 {
            return Err(PilotError::Config("bus_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Load, override from the environment, and validate.
///
/// # Errors
///
/// [`PilotError::Config`] when the file is missing or unreadable, a required
/// parameter is absent, or validation fails.
pub fn load_from(path: &Path) -> Result<RuntimeConfig, PilotError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        PilotError::Config(format!("Failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

pub fn parse(raw: &str) -> Result<RuntimeConfig, PilotError> {
    toml::from_str(raw).map_err(|e| PilotError::Config(format!("Failed to parse config: {e}")))
}

/// Apply `ROTORPILOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROTORPILOT_VELOCITY_ESTIMATE_IN_WORLD_FRAME` | `autopilot.velocity_estimate_in_world_frame` |
/// | `ROTORPILOT_CONTROL_COMMAND_DELAY` | `autopilot.control_command_delay` |
/// | `ROTORPILOT_OPTITRACK_LAND_DROP_HEIGHT` | `autopilot.optitrack_land_drop_height` |
/// | `ROTORPILOT_OPTITRACK_START_LAND_TIMEOUT` | `autopilot.optitrack_start_land_timeout` |
/// | `ROTORPILOT_OPTITRACK_START_HEIGHT` | `autopilot.optitrack_start_height` |
/// | `ROTORPILOT_START_IDLE_DURATION` | `autopilot.start_idle_duration` |
/// | `ROTORPILOT_IDLE_THRUST` | `autopilot.idle_thrust` |
/// | `ROTORPILOT_START_LAND_VELOCITY` | `autopilot.start_land_velocity` |
/// | `ROTORPILOT_PROPELLER_RAMP_DOWN_TIMEOUT` | `autopilot.propeller_ramp_down_timeout` |
/// | `ROTORPILOT_STATE_ESTIMATE_TIMEOUT` | `autopilot.state_estimate_timeout` |
///
/// Values that do not parse are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut RuntimeConfig) {
    apply_overrides_from(cfg, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides_from(
    cfg: &mut RuntimeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let ap = &mut cfg.autopilot;

    if let Some(v) = parsed::<bool>(&lookup, "ROTORPILOT_VELOCITY_ESTIMATE_IN_WORLD_FRAME") {
        ap.velocity_estimate_in_world_frame = v;
    }
    let scalars: [(&str, &mut f64); 8] = [
        ("ROTORPILOT_CONTROL_COMMAND_DELAY", &mut ap.control_command_delay),
        ("ROTORPILOT_OPTITRACK_LAND_DROP_HEIGHT", &mut ap.optitrack_land_drop_height),
        ("ROTORPILOT_OPTITRACK_START_LAND_TIMEOUT", &mut ap.optitrack_start_land_timeout),
        ("ROTORPILOT_OPTITRACK_START_HEIGHT", &mut ap.optitrack_start_height),
        ("ROTORPILOT_START_IDLE_DURATION", &mut ap.start_idle_duration),
        ("ROTORPILOT_IDLE_THRUST", &mut ap.idle_thrust),
        ("ROTORPILOT_START_LAND_VELOCITY", &mut ap.start_land_velocity),
        ("ROTORPILOT_PROPELLER_RAMP_DOWN_TIMEOUT", &mut ap.propeller_ramp_down_timeout),
    ];
    for (name, field) in scalars {
        if let Some(v) = parsed::<f64>(&lookup, name) {
            *field = v;
        }
    }
    if let Some(v) = parsed::<f64>(&lookup, "ROTORPILOT_STATE_ESTIMATE_TIMEOUT") {
        ap.state_estimate_timeout = Some(v);
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable override");
            None
        }
    }
}
