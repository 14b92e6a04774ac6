//! [`StatePredictor`] – forward prediction to actuation time.
//!
//! A command computed now only takes effect after the actuation delay, so the
//! autopilot controls against the state the vehicle will be in at that
//! moment.  The predictor sees every estimate and every issued command and
//! extrapolates to the requested time.
//!
//! [`ConstantVelocityPredictor`] is a small reference implementation:
//!
//! 1. Velocity from the latest valid estimate is rotated into the world frame
//!    when the estimator reports body-frame velocity.
//! 2. The horizon is split at the execution times of queued commands.  On each
//!    segment the command in effect (if armed) contributes its collective
//!    thrust along the body z-axis minus gravity, and its body rates rotate
//!    the attitude.
//! 3. Without an armed command the vehicle coasts at constant velocity.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use nalgebra::{UnitQuaternion, Vector3};
use rotorpilot_types::{ControlCommand, ControlMode, GRAVITY, StateEstimate};
use tracing::debug;

use crate::clock::seconds_between;

/// Upper bound on queued commands; older ones are dropped first.
const MAX_QUEUED_COMMANDS: usize = 256;

/// Collaborator contract used by the autopilot.
pub trait StatePredictor: Send {
    /// Ingest a freshly received estimate.
    fn update_with_estimate(&mut self, estimate: &StateEstimate);

    /// Record a command that was just issued to the vehicle.
    fn push_issued_command(&mut self, command: &ControlCommand);

    /// Predicted estimate at `time`, reflecting everything observed so far.
    fn predict_at(&self, time: DateTime<Utc>) -> StateEstimate;
}

/// Propagates the latest estimate at constant velocity, applying the
/// queued commands' thrust and body rates over the prediction horizon.
#[derive(Debug, Clone)]
pub struct ConstantVelocityPredictor {
    latest: Option<StateEstimate>,
    commands: VecDeque<ControlCommand>,
    velocity_in_world_frame: bool,
}

impl ConstantVelocityPredictor {
    /// `velocity_in_world_frame` says whether incoming estimates carry a
    /// world-frame velocity; otherwise it is rotated out of the body frame.
    pub fn new(velocity_in_world_frame: bool) -> Self {
        Self {
            latest: None,
            commands: VecDeque::new(),
            velocity_in_world_frame,
        }
    }

    pub fn velocity_in_world_frame(&self) -> bool {
        self.velocity_in_world_frame
    }

    /// Commands still held for prediction.
    pub fn queued_commands(&self) -> usize {
        self.commands.len()
    }

    /// The command in effect at `time`: the most recent one whose expected
    /// execution time is not after `time`.
    fn command_at(&self, time: DateTime<Utc>) -> Option<&ControlCommand> {
        self.commands
            .iter()
            .rev()
            .find(|c| c.expected_execution_time <= time)
    }

    /// Drop commands superseded before `time`, keeping the one still in effect.
    fn prune_before(&mut self, time: DateTime<Utc>) {
        while self.commands.len() > 1 && self.commands[1].expected_execution_time <= time {
            self.commands.pop_front();
        }
    }
}

impl StatePredictor for ConstantVelocityPredictor {
    fn update_with_estimate(&mut self, estimate: &StateEstimate) {
        if !estimate.is_valid() {
            debug!("predictor ignoring invalid state estimate");
            return;
        }
        let mut estimate = estimate.clone();
        if !self.velocity_in_world_frame {
            estimate.velocity = estimate.orientation * estimate.velocity;
        }
        self.prune_before(estimate.timestamp);
        self.latest = Some(estimate);
    }

    fn push_issued_command(&mut self, command: &ControlCommand) {
        self.commands.push_back(command.clone());
        while self.commands.len() > MAX_QUEUED_COMMANDS {
            self.commands.pop_front();
        }
    }

    fn predict_at(&self, time: DateTime<Utc>) -> StateEstimate {
        let Some(latest) = &self.latest else {
            // Nothing valid seen yet: the default estimate is flagged invalid.
            return StateEstimate::default();
        };
        let mut predicted = latest.clone();
        if time <= latest.timestamp {
            return predicted;
        }

        let mut breakpoints: Vec<DateTime<Utc>> = self
            .commands
            .iter()
            .map(|c| c.expected_execution_time)
            .filter(|t| *t > latest.timestamp && *t < time)
            .collect();
        breakpoints.sort();
        breakpoints.push(time);

        let mut t0 = latest.timestamp;
        for t1 in breakpoints {
            let dt = seconds_between(t1, t0);
            if dt <= 0.0 {
                continue;
            }
            let active = self
                .command_at(t0)
                .filter(|c| c.armed && c.control_mode != ControlMode::None);
            let (acceleration, bodyrates) = match active {
                Some(cmd) => (
                    predicted.orientation * Vector3::new(0.0, 0.0, cmd.collective_thrust)
                        - Vector3::new(0.0, 0.0, GRAVITY),
                    if cmd.control_mode == ControlMode::BodyRates {
                        cmd.bodyrates
                    } else {
                        predicted.bodyrates
                    },
                ),
                None => (Vector3::zeros(), predicted.bodyrates),
            };
            predicted.position += predicted.velocity * dt + acceleration * (0.5 * dt * dt);
            predicted.velocity += acceleration * dt;
            predicted.orientation *= UnitQuaternion::from_scaled_axis(bodyrates * dt);
            predicted.bodyrates = bodyrates;
            t0 = t1;
        }
        predicted.timestamp = time;
        predicted
    }
}
