//! `rotorpilot-types` – shared value objects for the rotorpilot workspace.
//!
//! Everything that crosses a crate boundary lives here: the flight [`Mode`],
//! state estimates, reference points, control commands, low-level feedback,
//! the outbound bus [`Event`] envelope, and the global [`PilotError`].

use chrono::{DateTime, TimeDelta, Utc};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Gravitational acceleration used as the hover-equivalent collective thrust
/// (mass-normalised, m/s²).
pub const GRAVITY: f64 = 9.81;

// ────────────────────────────────────────────────────────────────────────────
// Flight modes
// ────────────────────────────────────────────────────────────────────────────

/// The autopilot's current flight behavior. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Off,
    Start,
    Hover,
    Land,
    EmergencyLand,
    Braking,
    GoToPose,
    VelocityControl,
    ReferenceControl,
    TrajectoryControl,
    CommandFeedthrough,
    RcManual,
}

impl Mode {
    /// Modes that are declared but produce no command yet.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            Mode::Braking
                | Mode::GoToPose
                | Mode::VelocityControl
                | Mode::ReferenceControl
                | Mode::TrajectoryControl
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Off => "OFF",
            Mode::Start => "START",
            Mode::Hover => "HOVER",
            Mode::Land => "LAND",
            Mode::EmergencyLand => "EMERGENCY_LAND",
            Mode::Braking => "BRAKING",
            Mode::GoToPose => "GO_TO_POSE",
            Mode::VelocityControl => "VELOCITY_CONTROL",
            Mode::ReferenceControl => "REFERENCE_CONTROL",
            Mode::TrajectoryControl => "TRAJECTORY_CONTROL",
            Mode::CommandFeedthrough => "COMMAND_FEEDTHROUGH",
            Mode::RcManual => "RC_MANUAL",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// State estimate
// ────────────────────────────────────────────────────────────────────────────

/// Coordinate frame a [`StateEstimate`] is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateFrame {
    World,
    Optitrack,
    Vision,
    Local,
    #[default]
    Unknown,
}

impl CoordinateFrame {
    /// Anchored to a fixed world or motion-capture origin.
    pub fn is_absolute(self) -> bool {
        matches!(self, CoordinateFrame::World | CoordinateFrame::Optitrack)
    }

    /// Anchored to an arbitrary, drift-prone origin.
    pub fn is_relative(self) -> bool {
        matches!(self, CoordinateFrame::Vision | CoordinateFrame::Local)
    }
}

/// Pose and twist of the vehicle as reported by the estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEstimate {
    pub timestamp: DateTime<Utc>,
    pub coordinate_frame: CoordinateFrame,
    pub position: Vector3<f64>,
    /// Linear velocity; world frame unless the estimator reports body frame.
    pub velocity: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    /// Angular velocity in the body frame (rad/s).
    pub bodyrates: Vector3<f64>,
    /// Estimator-side validity flag.
    pub valid: bool,
}

impl Default for StateEstimate {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::default(),
            coordinate_frame: CoordinateFrame::Unknown,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            bodyrates: Vector3::zeros(),
            valid: false,
        }
    }
}

impl StateEstimate {
    /// `true` when the estimator flagged the estimate as valid and no
    /// component is NaN or infinite.
    pub fn is_valid(&self) -> bool {
        self.valid
            && self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.bodyrates.iter().all(|v| v.is_finite())
            && self.orientation.coords.iter().all(|v| v.is_finite())
    }

    /// Like [`is_valid`][Self::is_valid] but also rejects estimates whose
    /// timestamp is more than `max_age` behind `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
        self.is_valid() && now - self.timestamp <= max_age
    }

    /// Yaw angle of the ZYX Euler decomposition of the orientation.
    pub fn heading(&self) -> f64 {
        self.orientation.euler_angles().2
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reference trajectory point
// ────────────────────────────────────────────────────────────────────────────

/// Target the base controller is asked to track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub heading: f64,
}

impl Default for TrajectoryPoint {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            heading: 0.0,
        }
    }
}

impl TrajectoryPoint {
    /// Stationary reference at the estimate's position and heading.
    pub fn hold(estimate: &StateEstimate) -> Self {
        Self {
            position: estimate.position,
            velocity: Vector3::zeros(),
            heading: estimate.heading(),
        }
    }
}

/// Target pose for the reserved go-to-pose mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseCommand {
    pub position: Vector3<f64>,
    pub heading: f64,
}

/// Target twist for the reserved velocity-control mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub linear: Vector3<f64>,
    pub yaw_rate: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Control command
// ────────────────────────────────────────────────────────────────────────────

/// What the low-level controller should interpret a [`ControlCommand`] as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Sentinel: the command must not be published.
    #[default]
    None,
    Attitude,
    BodyRates,
    AngularAccelerations,
    RotorThrusts,
}

/// Command handed to the low-level flight controller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlCommand {
    pub control_mode: ControlMode,
    pub armed: bool,
    /// Body-rate setpoint (rad/s).
    pub bodyrates: Vector3<f64>,
    /// Mass-normalised collective thrust (m/s²).
    pub collective_thrust: f64,
    pub timestamp: DateTime<Utc>,
    pub expected_execution_time: DateTime<Utc>,
}

impl ControlCommand {
    /// A disarmed body-rate command with zero rates and zero thrust.
    pub fn zero() -> Self {
        Self {
            control_mode: ControlMode::BodyRates,
            armed: false,
            ..Self::default()
        }
    }

    /// Armed body-rate command with zero rates and the given thrust.
    pub fn armed_thrust(collective_thrust: f64) -> Self {
        Self {
            control_mode: ControlMode::BodyRates,
            armed: true,
            collective_thrust,
            ..Self::default()
        }
    }

    pub fn is_none(&self) -> bool {
        self.control_mode == ControlMode::None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Low-level feedback
// ────────────────────────────────────────────────────────────────────────────

/// Control authority reported by the low-level flight controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowLevelControlMode {
    #[default]
    None,
    Attitude,
    BodyRates,
    RcManual,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LowLevelFeedback {
    pub timestamp: DateTime<Utc>,
    pub control_mode: LowLevelControlMode,
    pub battery_voltage: f64,
}

impl LowLevelFeedback {
    /// `true` while a human pilot holds control authority.
    pub fn is_rc_manual(&self) -> bool {
        self.control_mode == LowLevelControlMode::RcManual
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Envelope for everything published on the outbound event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "rotorpilot-runtime::service"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: &str, timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            source: source.to_string(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    ControlCommand(ControlCommand),
    ModeChanged { from: Mode, to: Mode },
    Fault { component: String, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for configuration, request handling and transport.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PilotError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid State Estimate: {0}")]
    InvalidEstimate(String),

    #[error("Request Rejected in {mode}: {reason}")]
    RequestRejected { mode: Mode, reason: String },

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}
