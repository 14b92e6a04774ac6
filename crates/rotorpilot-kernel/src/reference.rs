//! Reference generators for the autonomous modes.
//!
//! Each step runs once per tick against the *predicted* estimate.  On the
//! first tick after a mode switch it re-initialises the reference point from
//! that estimate; afterwards it only moves the parts of the reference its
//! mode controls.
//!
//! | Mode    | Reference                                   | Command                     |
//! |---------|---------------------------------------------|-----------------------------|
//! | `Start` | idle, then altitude ramp at the start speed | idle thrust, then controller |
//! | `Hover` | frozen at entry pose                        | controller                  |
//! | `Land`  | altitude descent floored at zero            | controller, then ramp-down  |

use chrono::{DateTime, Utc};
use rotorpilot_types::{ControlCommand, Mode, StateEstimate, TrajectoryPoint};
use tracing::{debug, info};

use crate::autopilot::Autopilot;
use crate::clock::seconds_between;
use crate::controller::BaseController;
use crate::predictor::StatePredictor;
use crate::publisher::CommandSink;

impl<P, C, S> Autopilot<P, C, S>
where
    P: StatePredictor,
    C: BaseController,
    S: CommandSink,
{
    pub(crate) fn start_step(
        &mut self,
        estimate: &StateEstimate,
        now: DateTime<Utc>,
    ) -> ControlCommand {
        if self.timers.take_first_tick() {
            self.initial_start_position = estimate.position;
            self.reference_state = TrajectoryPoint::hold(estimate);
            if estimate.position.z >= self.config.optitrack_land_drop_height {
                info!(z = estimate.position.z, "Already airborne, switching to HOVER");
                self.set_mode(Mode::Hover, now);
                // The hold point above is the hover reference.
                self.timers.take_first_tick();
                return self.run_controller(estimate);
            }
        }

        let elapsed = self.timers.time_in_state(now);
        let cfg = &self.config;
        if elapsed > cfg.optitrack_start_land_timeout
            || self.reference_state.position.z >= cfg.optitrack_start_height
        {
            self.set_mode(Mode::Hover, now);
        } else if elapsed < cfg.start_idle_duration {
            return ControlCommand::armed_thrust(cfg.idle_thrust);
        } else {
            self.reference_state.position.z = self.initial_start_position.z
                + cfg.start_land_velocity * (elapsed - cfg.start_idle_duration);
            self.reference_state.velocity.z = cfg.start_land_velocity;
        }
        self.run_controller(estimate)
    }

    pub(crate) fn hover_step(&mut self, estimate: &StateEstimate) -> ControlCommand {
        if self.timers.take_first_tick() {
            self.reference_state = TrajectoryPoint::hold(estimate);
        }
        self.run_controller(estimate)
    }

    /// Descend, then ramp the propellers down once low enough or out of time.
    pub(crate) fn land_step(
        &mut self,
        estimate: &StateEstimate,
        now: DateTime<Utc>,
    ) -> ControlCommand {
        if self.timers.take_first_tick() {
            self.initial_land_position = estimate.position;
            self.reference_state = TrajectoryPoint::hold(estimate);
            self.timers.clear_ramp_down();
        }

        let elapsed = self.timers.time_in_state(now);
        let speed = self.config.start_land_velocity;
        self.reference_state.position.z = (self.initial_land_position.z - speed * elapsed).max(0.0);
        self.reference_state.velocity.z = -speed;

        let mut command = self.run_controller(estimate);

        if estimate.position.z < self.config.optitrack_land_drop_height
            || elapsed > self.config.optitrack_start_land_timeout
        {
            let last = self.publisher.last_issued_thrust();
            // A non-finite thrust has nothing to decay from.
            let drop_thrust = if last.is_finite() { last.max(0.0) } else { 0.0 };
            self.timers.latch_ramp_down(now, drop_thrust);
        }

        if let Some(ramp) = self.timers.ramp_down() {
            let timeout = self.config.propeller_ramp_down_timeout;
            let ramping_for = seconds_between(now, ramp.started_at).max(0.0);
            command.collective_thrust = if ramping_for >= timeout {
                0.0
            } else {
                ramp.initial_thrust - ramp.initial_thrust / timeout * ramping_for
            };
            debug!(thrust = command.collective_thrust, "Ramping propeller down");
        }

        if command.collective_thrust.is_nan() || command.collective_thrust <= 0.0 {
            info!("Propellers ramped down, switching to OFF");
            self.set_mode(Mode::Off, now);
            return ControlCommand::zero();
        }
        command
    }

    pub(crate) fn run_controller(&self, estimate: &StateEstimate) -> ControlCommand {
        self.controller
            .run(estimate, &self.reference_state, &self.controller_params)
    }
}
