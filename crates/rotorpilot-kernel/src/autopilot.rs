//! [`Autopilot`] – the flight-mode state machine.
//!
//! The autopilot is driven by two kinds of input:
//!
//! - **Ticks**: every state estimate runs [`Autopilot::on_state_estimate`],
//!   which predicts the state at actuation time, dispatches on the active
//!   [`Mode`] and publishes the resulting command.
//! - **Requests**: start, land, off, low-level feedback and external
//!   commands mutate the mode.  Their effect is visible to the next tick.
//!
//! Every handler takes the current wall-clock time as a parameter and runs
//! to completion without blocking.  The struct itself is not synchronised;
//! the runtime owns it from a single task.
//!
//! # Example
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use rotorpilot_kernel::{Autopilot, AutopilotConfig, BaseController, ConstantVelocityPredictor};
//! use rotorpilot_types::{
//!     ControlCommand, CoordinateFrame, Mode, PilotError, StateEstimate, TrajectoryPoint, GRAVITY,
//! };
//!
//! struct HoverThrust;
//! impl BaseController for HoverThrust {
//!     type Params = ();
//!     fn run(&self, _: &StateEstimate, _: &TrajectoryPoint, _: &()) -> ControlCommand {
//!         ControlCommand::armed_thrust(GRAVITY)
//!     }
//! }
//!
//! let config = AutopilotConfig {
//!     velocity_estimate_in_world_frame: true,
//!     control_command_delay: 0.05,
//!     optitrack_land_drop_height: 0.3,
//!     optitrack_start_land_timeout: 5.0,
//!     optitrack_start_height: 1.0,
//!     start_idle_duration: 0.5,
//!     idle_thrust: 2.0,
//!     start_land_velocity: 0.5,
//!     propeller_ramp_down_timeout: 1.0,
//!     state_estimate_timeout: None,
//! };
//! let now = DateTime::<Utc>::UNIX_EPOCH;
//! let sink = |_: &ControlCommand| -> Result<(), PilotError> { Ok(()) };
//! let mut pilot = Autopilot::new(
//!     config,
//!     ConstantVelocityPredictor::new(true),
//!     HoverThrust,
//!     (),
//!     sink,
//!     now,
//! )
//! .unwrap();
//!
//! let estimate = StateEstimate {
//!     timestamp: now,
//!     coordinate_frame: CoordinateFrame::World,
//!     valid: true,
//!     ..StateEstimate::default()
//! };
//! pilot.on_state_estimate(estimate, now);
//! assert_eq!(pilot.request_start(now), Ok(Mode::Start));
//! ```

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use rotorpilot_types::{
    ControlCommand, GRAVITY, LowLevelFeedback, Mode, PilotError, PoseCommand, StateEstimate,
    TrajectoryPoint, VelocityCommand,
};
use tracing::{debug, error, info, warn};

use crate::config::AutopilotConfig;
use crate::controller::BaseController;
use crate::predictor::StatePredictor;
use crate::publisher::{CommandPublisher, CommandSink};
use crate::timers::ModeTimers;

/// Flight-mode state machine over a predictor `P`, a base controller `C`
/// and a command transport `S`.
pub struct Autopilot<P, C: BaseController, S> {
    pub(crate) config: AutopilotConfig,
    pub(crate) mode: Mode,
    /// Where a manual hand-back resumes.  Reset to `Off` on every entry into
    /// `RcManual` and by an off request.
    pub(crate) mode_before_rc_manual: Mode,
    pub(crate) timers: ModeTimers,
    pub(crate) reference_state: TrajectoryPoint,
    pub(crate) initial_start_position: Vector3<f64>,
    pub(crate) initial_land_position: Vector3<f64>,
    pub(crate) latest_estimate: Option<StateEstimate>,
    pub(crate) estimate_available: bool,
    pub(crate) predictor: P,
    pub(crate) controller: C,
    pub(crate) controller_params: C::Params,
    pub(crate) publisher: CommandPublisher<S>,
}

impl<P, C, S> Autopilot<P, C, S>
where
    P: StatePredictor,
    C: BaseController,
    S: CommandSink,
{
    /// Build an autopilot in `Off`.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Config`] when `config` fails validation.
    pub fn new(
        config: AutopilotConfig,
        predictor: P,
        controller: C,
        controller_params: C::Params,
        sink: S,
        now: DateTime<Utc>,
    ) -> Result<Self, PilotError> {
        config.validate()?;
        Ok(Self {
            config,
            mode: Mode::Off,
            mode_before_rc_manual: Mode::Off,
            timers: ModeTimers::new(now),
            reference_state: TrajectoryPoint::default(),
            initial_start_position: Vector3::zeros(),
            initial_land_position: Vector3::zeros(),
            latest_estimate: None,
            estimate_available: false,
            predictor,
            controller,
            controller_params,
            publisher: CommandPublisher::new(sink),
        })
    }

    // ── Tick ────────────────────────────────────────────────────────────────

    /// Run one control cycle for a freshly received `estimate`.
    ///
    /// Returns the command that was published, or `None` when nothing went
    /// out (feedthrough, reserved mode, or a suppressed sentinel command).
    pub fn on_state_estimate(
        &mut self,
        estimate: StateEstimate,
        now: DateTime<Utc>,
    ) -> Option<ControlCommand> {
        self.estimate_available = self.is_usable(&estimate, now);
        if !self.estimate_available && !matches!(self.mode, Mode::Off | Mode::EmergencyLand) {
            self.set_mode(Mode::EmergencyLand, now);
            error!("Received invalid state estimate, going to EMERGENCY_LAND");
        }

        self.predictor.update_with_estimate(&estimate);
        self.latest_estimate = Some(estimate);

        let execution_time = now + self.config.command_delay();
        let predicted = self.predictor.predict_at(execution_time);

        let mut command = match self.mode {
            Mode::Off => ControlCommand::zero(),
            Mode::Start => self.start_step(&predicted, now),
            Mode::Hover => self.hover_step(&predicted),
            Mode::Land => self.land_step(&predicted, now),
            Mode::EmergencyLand => {
                if self.estimate_available {
                    self.set_mode(Mode::Hover, now);
                }
                ControlCommand::default()
            }
            // Keeps the low-level side armed for when authority is handed back.
            Mode::RcManual => ControlCommand::armed_thrust(GRAVITY),
            // Published from `on_external_command`.
            Mode::CommandFeedthrough => return None,
            Mode::Braking
            | Mode::GoToPose
            | Mode::VelocityControl
            | Mode::ReferenceControl
            | Mode::TrajectoryControl => {
                debug!(mode = %self.mode, "mode not implemented, no command issued");
                return None;
            }
        };

        command.timestamp = now;
        command.expected_execution_time = execution_time;
        self.publisher.publish(command, &mut self.predictor)
    }

    fn is_usable(&self, estimate: &StateEstimate, now: DateTime<Utc>) -> bool {
        match self.config.estimate_timeout() {
            Some(max_age) => estimate.is_valid_at(now, max_age),
            None => estimate.is_valid(),
        }
    }

    // ── Requests ────────────────────────────────────────────────────────────

    /// Take off from `Off`.
    ///
    /// Absolute frames run the ramped takeoff; relative frames go straight
    /// to `Hover`.
    ///
    /// # Errors
    ///
    /// [`PilotError::RequestRejected`] when not in `Off`, when no valid
    /// estimate is available, or when its frame is unknown.
    pub fn request_start(&mut self, now: DateTime<Utc>) -> Result<Mode, PilotError> {
        info!("START command received");
        if self.mode != Mode::Off {
            warn!(mode = %self.mode, "Autopilot is not OFF, will not switch to START");
            return Err(self.rejected("autopilot is not OFF"));
        }
        let Some(frame) = self.available_estimate().map(|e| e.coordinate_frame) else {
            warn!("No state estimate available, will not start");
            return Err(self.rejected("no state estimate available"));
        };

        if frame.is_absolute() {
            info!(?frame, "Absolute state estimate available, taking off based on it");
            self.set_mode(Mode::Start, now);
        } else if frame.is_relative() {
            info!(?frame, "Relative state estimate available, switch to hover");
            self.set_mode(Mode::Hover, now);
        } else {
            warn!(?frame, "State estimate frame unknown, will not start");
            return Err(self.rejected("state estimate frame unknown"));
        }
        Ok(self.mode)
    }

    /// Land, or emergency-land when no absolute estimate is available.
    ///
    /// # Errors
    ///
    /// [`PilotError::RequestRejected`] with no state change when already
    /// off, landing, manual or in feedthrough.
    pub fn request_land(&mut self, now: DateTime<Utc>) -> Result<Mode, PilotError> {
        if matches!(
            self.mode,
            Mode::Off | Mode::Land | Mode::EmergencyLand | Mode::CommandFeedthrough | Mode::RcManual
        ) {
            info!(mode = %self.mode, "LAND command ignored");
            return Err(self.rejected("landing not possible in this mode"));
        }
        info!("LAND command received");

        match self.available_estimate().map(|e| e.coordinate_frame) {
            Some(frame) if frame.is_absolute() => {
                info!("Absolute state estimate available, landing based on it");
                self.set_mode(Mode::Land, now);
            }
            Some(_) => {
                info!("No absolute state estimate available, EMERGENCY_LAND instead");
                self.set_mode(Mode::EmergencyLand, now);
            }
            None => {
                warn!("No state estimate available, EMERGENCY_LAND instead");
                self.set_mode(Mode::EmergencyLand, now);
            }
        }
        Ok(self.mode)
    }

    /// Switch to `Off` from any mode.
    ///
    /// Also forgets the manual hand-back target, so releasing the RC after
    /// an off request does not resume flight.
    pub fn request_off(&mut self, now: DateTime<Utc>) -> Mode {
        if self.mode != Mode::Off {
            info!("OFF command received");
        }
        self.set_mode(Mode::Off, now);
        self.mode_before_rc_manual = Mode::Off;
        self.mode
    }

    /// Track control authority reported by the low-level controller.
    ///
    /// Only edges act: taking the RC enters `RcManual`, releasing it resumes
    /// `Off` or `Braking`.
    pub fn on_low_level_feedback(&mut self, feedback: &LowLevelFeedback, now: DateTime<Utc>) -> Mode {
        let manual = feedback.is_rc_manual();
        if manual && self.mode != Mode::RcManual {
            warn!(mode = %self.mode, "RC took over control authority");
            self.set_mode(Mode::RcManual, now);
        } else if !manual && self.mode == Mode::RcManual {
            let resume = if self.mode_before_rc_manual == Mode::Off {
                Mode::Off
            } else {
                Mode::Braking
            };
            info!(resume = %resume, "RC released control authority");
            self.set_mode(resume, now);
        }
        self.mode
    }

    /// Publish an externally computed command verbatim.
    ///
    /// Accepted in `Off`, `Hover` and `CommandFeedthrough`; switches to
    /// `CommandFeedthrough`.  Returns the forwarded command, or `None` when
    /// the mode gate rejected it.
    pub fn on_external_command(
        &mut self,
        command: ControlCommand,
        now: DateTime<Utc>,
    ) -> Option<ControlCommand> {
        if !matches!(self.mode, Mode::Off | Mode::Hover | Mode::CommandFeedthrough) {
            debug!(mode = %self.mode, "external command ignored");
            return None;
        }
        if self.mode != Mode::CommandFeedthrough {
            self.set_mode(Mode::CommandFeedthrough, now);
        }
        self.publisher.transmit(&command);
        Some(command)
    }

    /// Estimator link went silent.
    ///
    /// Marks the estimate unavailable and forces `EmergencyLand` unless in
    /// `Off` or `EmergencyLand`.  Returns `true` when the mode changed.
    pub fn on_estimate_timeout(&mut self, now: DateTime<Utc>) -> bool {
        self.estimate_available = false;
        if matches!(self.mode, Mode::Off | Mode::EmergencyLand) {
            return false;
        }
        error!(mode = %self.mode, "State estimate timed out, going to EMERGENCY_LAND");
        self.set_mode(Mode::EmergencyLand, now);
        true
    }

    /// Go-to-pose input.  Logged only.
    pub fn on_pose_command(&mut self, pose: &PoseCommand) {
        debug!(?pose, "pose command received, go-to-pose not implemented");
    }

    /// Velocity-control input.  Logged only.
    pub fn on_velocity_command(&mut self, velocity: &VelocityCommand) {
        debug!(?velocity, "velocity command received, velocity control not implemented");
    }

    /// Single reference-point input.  Logged only.
    pub fn on_reference_state(&mut self, reference: &TrajectoryPoint) {
        debug!(?reference, "reference state received, reference control not implemented");
    }

    /// Trajectory input.  Logged only.
    pub fn on_trajectory(&mut self, trajectory: &[TrajectoryPoint]) {
        debug!(
            points = trajectory.len(),
            "trajectory received, trajectory control not implemented"
        );
    }

    // ── Transitions ─────────────────────────────────────────────────────────

    /// The only place the mode is written.  Restarts the mode timers.
    pub(crate) fn set_mode(&mut self, new_mode: Mode, now: DateTime<Utc>) {
        if new_mode != self.mode {
            info!(from = %self.mode, to = %new_mode, "autopilot mode switch");
        }
        self.timers.restart(now);
        if new_mode == Mode::RcManual {
            self.mode_before_rc_manual = Mode::Off;
        }
        self.mode = new_mode;
    }

    fn available_estimate(&self) -> Option<&StateEstimate> {
        self.latest_estimate.as_ref().filter(|_| self.estimate_available)
    }

    fn rejected(&self, reason: &str) -> PilotError {
        PilotError::RequestRejected {
            mode: self.mode,
            reason: reason.to_string(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    /// Active flight mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Mode a manual hand-back would resume from.
    pub fn mode_before_rc_manual(&self) -> Mode {
        self.mode_before_rc_manual
    }

    /// Timing state of the active mode.
    pub fn timers(&self) -> &ModeTimers {
        &self.timers
    }

    /// Reference point the base controller tracks.
    pub fn reference_state(&self) -> &TrajectoryPoint {
        &self.reference_state
    }

    pub fn config(&self) -> &AutopilotConfig {
        &self.config
    }

    /// Whether the most recent estimate passed validation.
    pub fn estimate_available(&self) -> bool {
        self.estimate_available
    }

    /// Most recent estimate received, valid or not.
    pub fn latest_estimate(&self) -> Option<&StateEstimate> {
        self.latest_estimate.as_ref()
    }

    /// Collective thrust of the last published command.
    pub fn last_issued_thrust(&self) -> f64 {
        self.publisher.last_issued_thrust()
    }

    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    /// The command transport.
    pub fn sink(&self) -> &S {
        self.publisher.sink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use approx::assert_relative_eq;
    use chrono::TimeDelta;
    use rotorpilot_types::{ControlMode, CoordinateFrame, LowLevelControlMode};
    use std::sync::{Arc, Mutex};

    /// Predicts exactly the last estimate it was given, valid or not.
    #[derive(Default)]
    struct EchoPredictor {
        last: Option<StateEstimate>,
        pushed: usize,
    }

    impl StatePredictor for EchoPredictor {
        fn update_with_estimate(&mut self, estimate: &StateEstimate) {
            self.last = Some(estimate.clone());
        }

        fn push_issued_command(&mut self, _command: &ControlCommand) {
            self.pushed += 1;
        }

        fn predict_at(&self, _time: DateTime<Utc>) -> StateEstimate {
            self.last.clone().unwrap_or_default()
        }
    }

    struct FixedThrust;

    impl BaseController for FixedThrust {
        type Params = f64;

        fn run(&self, _: &StateEstimate, _: &TrajectoryPoint, thrust: &f64) -> ControlCommand {
            ControlCommand::armed_thrust(*thrust)
        }
    }

    type Sent = Arc<Mutex<Vec<ControlCommand>>>;

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::milliseconds(ms)
    }

    fn estimate(frame: CoordinateFrame, z: f64, ms: i64) -> StateEstimate {
        StateEstimate {
            timestamp: t(ms),
            coordinate_frame: frame,
            position: Vector3::new(0.0, 0.0, z),
            valid: true,
            ..StateEstimate::default()
        }
    }

    fn invalid(ms: i64) -> StateEstimate {
        StateEstimate {
            valid: false,
            ..estimate(CoordinateFrame::World, 1.0, ms)
        }
    }

    fn pilot_with(
        config: AutopilotConfig,
    ) -> (Autopilot<EchoPredictor, FixedThrust, impl CommandSink>, Sent) {
        let sent: Sent = Arc::default();
        let log = Arc::clone(&sent);
        let sink = move |cmd: &ControlCommand| -> Result<(), PilotError> {
            log.lock().unwrap().push(cmd.clone());
            Ok(())
        };
        let pilot = Autopilot::new(
            config,
            EchoPredictor::default(),
            FixedThrust,
            GRAVITY,
            sink,
            t(0),
        )
        .unwrap();
        (pilot, sent)
    }

    fn pilot() -> (Autopilot<EchoPredictor, FixedThrust, impl CommandSink>, Sent) {
        pilot_with(test_config())
    }

    /// Bring a fresh autopilot into `Hover` at altitude `z` at time 0.
    fn hovering(z: f64) -> (Autopilot<EchoPredictor, FixedThrust, impl CommandSink>, Sent) {
        let (mut ap, sent) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::Vision, z, 0), t(0));
        assert_eq!(ap.request_start(t(0)), Ok(Mode::Hover));
        ap.on_state_estimate(estimate(CoordinateFrame::Vision, z, 0), t(0));
        (ap, sent)
    }

    // ── Construction and Off ────────────────────────────────────────────────

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut cfg = test_config();
        cfg.propeller_ramp_down_timeout = 0.0;
        let result = Autopilot::new(
            cfg,
            EchoPredictor::default(),
            FixedThrust,
            GRAVITY,
            |_: &ControlCommand| -> Result<(), PilotError> { Ok(()) },
            t(0),
        );
        assert!(matches!(result, Err(PilotError::Config(_))));
    }

    #[test]
    fn off_publishes_stamped_disarmed_command() {
        let (mut ap, sent) = pilot();
        let cmd = ap
            .on_state_estimate(estimate(CoordinateFrame::World, 0.0, 10), t(10))
            .unwrap();
        assert_eq!(cmd.control_mode, ControlMode::BodyRates);
        assert!(!cmd.armed);
        assert_eq!(cmd.collective_thrust, 0.0);
        assert_eq!(cmd.timestamp, t(10));
        assert_eq!(cmd.expected_execution_time, t(60));
        assert_eq!(sent.lock().unwrap().as_slice(), &[cmd]);
        assert_eq!(ap.predictor().pushed, 1);
    }

    #[test]
    fn invalid_estimate_in_off_stays_off() {
        let (mut ap, sent) = pilot();
        assert!(ap.on_state_estimate(invalid(0), t(0)).is_some());
        assert_eq!(ap.mode(), Mode::Off);
        assert!(!ap.estimate_available());
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    // ── Start ───────────────────────────────────────────────────────────────

    #[test]
    fn start_with_absolute_frame_enters_start() {
        for frame in [CoordinateFrame::World, CoordinateFrame::Optitrack] {
            let (mut ap, _) = pilot();
            ap.on_state_estimate(estimate(frame, 0.0, 0), t(0));
            assert_eq!(ap.request_start(t(0)), Ok(Mode::Start));
        }
    }

    #[test]
    fn start_with_relative_frame_goes_straight_to_hover() {
        for frame in [CoordinateFrame::Vision, CoordinateFrame::Local] {
            let (mut ap, sent) = pilot();
            ap.on_state_estimate(estimate(frame, 0.0, 0), t(0));
            assert_eq!(ap.request_start(t(0)), Ok(Mode::Hover));

            // First hover tick runs the controller, never the idle command.
            let cmd = ap.on_state_estimate(estimate(frame, 0.0, 100), t(100)).unwrap();
            assert_relative_eq!(cmd.collective_thrust, GRAVITY);
            assert_eq!(sent.lock().unwrap().len(), 2);
        }
    }

    #[test]
    fn start_without_estimate_is_rejected() {
        let (mut ap, _) = pilot();
        let err = ap.request_start(t(0)).unwrap_err();
        assert!(matches!(err, PilotError::RequestRejected { mode: Mode::Off, .. }));
        assert_eq!(ap.mode(), Mode::Off);
    }

    #[test]
    fn start_after_invalid_estimate_is_rejected() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::World, 0.0, 0), t(0));
        ap.on_state_estimate(invalid(10), t(10));
        assert!(ap.request_start(t(10)).is_err());
        assert_eq!(ap.mode(), Mode::Off);
    }

    #[test]
    fn start_with_unknown_frame_is_rejected() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::Unknown, 0.0, 0), t(0));
        assert!(ap.request_start(t(0)).is_err());
        assert_eq!(ap.mode(), Mode::Off);
    }

    #[test]
    fn start_outside_off_is_rejected() {
        let (mut ap, _) = hovering(1.0);
        let err = ap.request_start(t(100)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Request Rejected in HOVER: autopilot is not OFF"
        );
        assert_eq!(ap.mode(), Mode::Hover);
    }

    #[test]
    fn takeoff_idles_then_ramps_to_hover() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::World, 0.1, 0), t(0));
        ap.request_start(t(0)).unwrap();

        let mut hover_at = None;
        for ms in (0..=3_000).step_by(100) {
            let cmd = ap.on_state_estimate(estimate(CoordinateFrame::World, 0.1, ms), t(ms));
            if ms < 500 {
                let cmd = cmd.unwrap();
                assert!(cmd.armed);
                assert_eq!(cmd.bodyrates, Vector3::zeros());
                assert_relative_eq!(cmd.collective_thrust, 2.0);
            } else if ap.mode() == Mode::Start {
                let elapsed = (ms - 500) as f64 / 1_000.0;
                assert_relative_eq!(
                    ap.reference_state().position.z,
                    0.1 + 0.5 * elapsed,
                    epsilon = 1e-9
                );
                assert_relative_eq!(ap.reference_state().velocity.z, 0.5);
                assert_relative_eq!(cmd.unwrap().collective_thrust, GRAVITY);
            }
            if ap.mode() == Mode::Hover && hover_at.is_none() {
                hover_at = Some(ms);
            }
        }
        // 0.9 m at 0.5 m/s after the idle window: 2.3 s, plus one tick to notice.
        let hover_at = hover_at.unwrap();
        assert!((2_300..=2_500).contains(&hover_at), "hover at {hover_at} ms");
    }

    #[test]
    fn takeoff_when_airborne_skips_to_hover() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::World, 0.5, 0), t(0));
        ap.request_start(t(0)).unwrap();

        let cmd = ap
            .on_state_estimate(estimate(CoordinateFrame::World, 0.5, 10), t(10))
            .unwrap();
        assert_eq!(ap.mode(), Mode::Hover);
        assert_relative_eq!(cmd.collective_thrust, GRAVITY);
        assert_relative_eq!(ap.reference_state().position.z, 0.5);
        assert!(!ap.timers().is_first_tick());
    }

    #[test]
    fn takeoff_times_out_into_hover() {
        let mut cfg = test_config();
        cfg.optitrack_start_height = 100.0;
        let (mut ap, _) = pilot_with(cfg);
        ap.on_state_estimate(estimate(CoordinateFrame::World, 0.0, 0), t(0));
        ap.request_start(t(0)).unwrap();

        ap.on_state_estimate(estimate(CoordinateFrame::World, 0.0, 5_000), t(5_000));
        assert_eq!(ap.mode(), Mode::Start);
        ap.on_state_estimate(estimate(CoordinateFrame::World, 0.0, 5_100), t(5_100));
        assert_eq!(ap.mode(), Mode::Hover);
    }

    // ── Hover ───────────────────────────────────────────────────────────────

    #[test]
    fn hover_holds_reference_fixed() {
        let (mut ap, _) = hovering(1.0);
        let held = ap.reference_state().clone();
        assert_relative_eq!(held.position.z, 1.0);

        for (i, z) in [1.2, 0.8, 1.5, 0.9].into_iter().enumerate() {
            let ms = 100 * (i as i64 + 1);
            let mut est = estimate(CoordinateFrame::Vision, z, ms);
            est.position.x = z;
            ap.on_state_estimate(est, t(ms));
            assert_eq!(ap.reference_state(), &held);
        }
    }

    #[test]
    fn hover_reinitialises_reference_on_entry() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::World, 0.0, 0), t(0));
        ap.request_start(t(0)).unwrap();
        ap.set_mode(Mode::Hover, t(100));
        ap.on_state_estimate(estimate(CoordinateFrame::World, 2.0, 100), t(100));
        assert_relative_eq!(ap.reference_state().position.z, 2.0);
    }

    // ── Land ────────────────────────────────────────────────────────────────

    #[test]
    fn land_with_absolute_frame_enters_land() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 0), t(0));
        ap.set_mode(Mode::Hover, t(0));
        assert_eq!(ap.request_land(t(0)), Ok(Mode::Land));
    }

    #[test]
    fn land_with_relative_frame_emergency_lands() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::Local, 1.0, 0), t(0));
        ap.set_mode(Mode::Hover, t(0));
        assert_eq!(ap.request_land(t(0)), Ok(Mode::EmergencyLand));
    }

    #[test]
    fn land_without_estimate_emergency_lands() {
        let (mut ap, _) = pilot();
        ap.set_mode(Mode::Hover, t(0));
        assert_eq!(ap.request_land(t(0)), Ok(Mode::EmergencyLand));
    }

    #[test]
    fn land_is_ignored_in_terminal_and_external_modes() {
        for mode in [
            Mode::Off,
            Mode::Land,
            Mode::EmergencyLand,
            Mode::CommandFeedthrough,
            Mode::RcManual,
        ] {
            let (mut ap, _) = pilot();
            ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 0), t(0));
            ap.set_mode(mode, t(0));
            let switched_at = ap.timers().switched_at();

            assert!(ap.request_land(t(50)).is_err(), "{mode}");
            assert_eq!(ap.mode(), mode);
            assert_eq!(ap.timers().switched_at(), switched_at);
        }
    }

    #[test]
    fn landing_descends_reference_floored_at_zero() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 0), t(0));
        ap.set_mode(Mode::Hover, t(0));
        ap.request_land(t(0)).unwrap();

        ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 0), t(0));
        assert_relative_eq!(ap.reference_state().position.z, 1.0);
        assert_relative_eq!(ap.reference_state().velocity.z, -0.5);

        ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 1_000), t(1_000));
        assert_relative_eq!(ap.reference_state().position.z, 0.5, epsilon = 1e-9);

        ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 3_000), t(3_000));
        assert_relative_eq!(ap.reference_state().position.z, 0.0);
    }

    #[test]
    fn ramp_down_below_drop_height_reaches_off() {
        let (mut ap, sent) = hovering(0.2);
        ap.set_mode(Mode::Land, t(0));

        let mut previous = f64::INFINITY;
        let mut off_at = None;
        for ms in (0..=2_000).step_by(100) {
            let cmd = ap
                .on_state_estimate(estimate(CoordinateFrame::World, 0.2, ms), t(ms))
                .unwrap();
            assert!(ap.timers().ramp_down().is_some() || ap.mode() == Mode::Off);
            assert!(cmd.collective_thrust <= previous);
            previous = cmd.collective_thrust;
            if ap.mode() == Mode::Off {
                assert_eq!(cmd.collective_thrust, 0.0);
                assert!(!cmd.armed);
                off_at = Some(ms);
                break;
            }
        }
        // Ramps from the hover thrust over propeller_ramp_down_timeout.
        let off_at = off_at.unwrap();
        assert!(off_at <= 1_100, "off at {off_at} ms");
        assert!(sent.lock().unwrap().len() > 2);
    }

    #[test]
    fn ramp_down_starts_from_last_issued_thrust() {
        let (mut ap, _) = hovering(0.2);
        assert_relative_eq!(ap.last_issued_thrust(), GRAVITY);
        ap.set_mode(Mode::Land, t(0));

        let cmd = ap
            .on_state_estimate(estimate(CoordinateFrame::World, 0.2, 500), t(500))
            .unwrap();
        // Latched at 500 ms, so no decay yet on this tick.
        assert_relative_eq!(cmd.collective_thrust, GRAVITY);
        let cmd = ap
            .on_state_estimate(estimate(CoordinateFrame::World, 0.2, 750), t(750))
            .unwrap();
        assert_relative_eq!(cmd.collective_thrust, GRAVITY * 0.75, epsilon = 1e-9);
    }

    #[test]
    fn landing_that_never_descends_is_bounded_by_timeout() {
        let (mut ap, _) = hovering(2.0);
        ap.set_mode(Mode::Land, t(0));

        let mut off_at = None;
        for ms in (0..=10_000).step_by(100) {
            ap.on_state_estimate(estimate(CoordinateFrame::World, 2.0, ms), t(ms));
            if ap.mode() == Mode::Off {
                off_at = Some(ms);
                break;
            }
        }
        // Timeout 5 s, then a 1 s ramp-down.
        let off_at = off_at.unwrap();
        assert!((5_100..=6_200).contains(&off_at), "off at {off_at} ms");
    }

    // ── Invalid estimates and emergency landing ─────────────────────────────

    #[test]
    fn invalid_estimate_forces_emergency_land_on_same_tick() {
        for mode in [Mode::Start, Mode::Hover, Mode::Land, Mode::RcManual, Mode::Braking] {
            let (mut ap, sent) = pilot();
            ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 0), t(0));
            ap.set_mode(mode, t(0));
            let before = sent.lock().unwrap().len();

            assert!(ap.on_state_estimate(invalid(100), t(100)).is_none(), "{mode}");
            assert_eq!(ap.mode(), Mode::EmergencyLand);
            assert_eq!(sent.lock().unwrap().len(), before);
        }
    }

    #[test]
    fn emergency_land_recovers_to_hover_on_valid_estimate() {
        let (mut ap, sent) = hovering(1.0);
        ap.on_state_estimate(invalid(100), t(100));
        ap.on_state_estimate(invalid(200), t(200));
        assert_eq!(ap.mode(), Mode::EmergencyLand);

        // Recovery tick switches mode but publishes nothing.
        let before = sent.lock().unwrap().len();
        assert!(
            ap.on_state_estimate(estimate(CoordinateFrame::World, 0.7, 300), t(300))
                .is_none()
        );
        assert_eq!(ap.mode(), Mode::Hover);
        assert_eq!(sent.lock().unwrap().len(), before);

        ap.on_state_estimate(estimate(CoordinateFrame::World, 0.7, 400), t(400));
        assert_relative_eq!(ap.reference_state().position.z, 0.7);
    }

    #[test]
    fn stale_estimate_counts_as_invalid() {
        let mut cfg = test_config();
        cfg.state_estimate_timeout = Some(0.1);
        let (mut ap, _) = pilot_with(cfg);
        ap.on_state_estimate(estimate(CoordinateFrame::Vision, 1.0, 0), t(0));
        ap.request_start(t(0)).unwrap();

        ap.on_state_estimate(estimate(CoordinateFrame::Vision, 1.0, 0), t(500));
        assert_eq!(ap.mode(), Mode::EmergencyLand);
    }

    #[test]
    fn estimate_timeout_forces_emergency_land() {
        let (mut ap, _) = hovering(1.0);
        assert!(ap.on_estimate_timeout(t(1_000)));
        assert_eq!(ap.mode(), Mode::EmergencyLand);
        assert!(!ap.estimate_available());
        assert!(!ap.on_estimate_timeout(t(1_100)));
    }

    #[test]
    fn estimate_timeout_in_off_changes_nothing() {
        let (mut ap, _) = pilot();
        assert!(!ap.on_estimate_timeout(t(1_000)));
        assert_eq!(ap.mode(), Mode::Off);
    }

    // ── Off and manual flight ───────────────────────────────────────────────

    #[test]
    fn off_request_from_any_mode() {
        let (mut ap, _) = hovering(1.0);
        assert_eq!(ap.request_off(t(100)), Mode::Off);
        assert_eq!(ap.mode_before_rc_manual(), Mode::Off);
        assert_eq!(ap.timers().switched_at(), t(100));
    }

    #[test]
    fn rc_manual_keeps_low_level_armed() {
        let (mut ap, _) = hovering(1.0);
        let manual = LowLevelFeedback {
            control_mode: LowLevelControlMode::RcManual,
            ..LowLevelFeedback::default()
        };
        assert_eq!(ap.on_low_level_feedback(&manual, t(100)), Mode::RcManual);
        assert_eq!(ap.mode_before_rc_manual(), Mode::Off);

        let cmd = ap
            .on_state_estimate(estimate(CoordinateFrame::World, 1.0, 200), t(200))
            .unwrap();
        assert!(cmd.armed);
        assert_eq!(cmd.control_mode, ControlMode::BodyRates);
        assert_eq!(cmd.bodyrates, Vector3::zeros());
        assert_relative_eq!(cmd.collective_thrust, GRAVITY);
    }

    #[test]
    fn rc_feedback_acts_on_edges_only() {
        let (mut ap, _) = hovering(1.0);
        let manual = LowLevelFeedback {
            control_mode: LowLevelControlMode::RcManual,
            ..LowLevelFeedback::default()
        };
        ap.on_low_level_feedback(&manual, t(100));
        ap.on_low_level_feedback(&manual, t(200));
        assert_eq!(ap.timers().switched_at(), t(100));

        let auto = LowLevelFeedback {
            control_mode: LowLevelControlMode::BodyRates,
            ..LowLevelFeedback::default()
        };
        assert_eq!(ap.on_low_level_feedback(&auto, t(300)), Mode::Off);
        assert_eq!(ap.on_low_level_feedback(&auto, t(400)), Mode::Off);
        assert_eq!(ap.timers().switched_at(), t(300));
    }

    #[test]
    fn rc_release_with_remembered_mode_resumes_braking() {
        let (mut ap, _) = pilot();
        ap.set_mode(Mode::RcManual, t(0));
        ap.mode_before_rc_manual = Mode::Hover;
        let auto = LowLevelFeedback::default();
        assert_eq!(ap.on_low_level_feedback(&auto, t(100)), Mode::Braking);
    }

    #[test]
    fn off_request_forgets_manual_hand_back() {
        let (mut ap, _) = pilot();
        ap.set_mode(Mode::RcManual, t(0));
        ap.mode_before_rc_manual = Mode::Hover;

        assert_eq!(ap.request_off(t(100)), Mode::Off);
        assert_eq!(ap.mode_before_rc_manual(), Mode::Off);
        // A late release edge does not resume flight either.
        assert_eq!(ap.on_low_level_feedback(&LowLevelFeedback::default(), t(200)), Mode::Off);
    }

    // ── Reserved modes and inputs ───────────────────────────────────────────

    #[test]
    fn reserved_modes_issue_no_command() {
        for mode in [
            Mode::Braking,
            Mode::GoToPose,
            Mode::VelocityControl,
            Mode::ReferenceControl,
            Mode::TrajectoryControl,
        ] {
            let (mut ap, sent) = pilot();
            ap.set_mode(mode, t(0));
            assert!(
                ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 10), t(10))
                    .is_none()
            );
            assert_eq!(ap.mode(), mode);
            assert!(sent.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn reserved_inputs_have_no_effect() {
        let (mut ap, _) = hovering(1.0);
        let held = ap.reference_state().clone();
        ap.on_pose_command(&PoseCommand {
            position: Vector3::new(1.0, 1.0, 1.0),
            heading: 0.0,
        });
        ap.on_velocity_command(&VelocityCommand {
            linear: Vector3::new(1.0, 0.0, 0.0),
            yaw_rate: 0.0,
        });
        ap.on_reference_state(&TrajectoryPoint::default());
        ap.on_trajectory(&[TrajectoryPoint::default()]);
        assert_eq!(ap.mode(), Mode::Hover);
        assert_eq!(ap.reference_state(), &held);
    }

    // ── Feedthrough ─────────────────────────────────────────────────────────

    #[test]
    fn external_command_enters_feedthrough_and_is_sent_verbatim() {
        let (mut ap, sent) = pilot();
        let mut cmd = ControlCommand::armed_thrust(5.0);
        cmd.bodyrates = Vector3::new(0.1, 0.2, 0.3);

        assert_eq!(ap.on_external_command(cmd.clone(), t(0)), Some(cmd.clone()));
        assert_eq!(ap.mode(), Mode::CommandFeedthrough);
        assert_eq!(sent.lock().unwrap().as_slice(), &[cmd]);
        // Feedthrough commands bypass the predictor and the thrust record.
        assert_eq!(ap.predictor().pushed, 0);
        assert_eq!(ap.last_issued_thrust(), 0.0);
    }

    #[test]
    fn feedthrough_tick_publishes_nothing() {
        let (mut ap, sent) = pilot();
        ap.on_external_command(ControlCommand::armed_thrust(5.0), t(0));
        assert!(
            ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 10), t(10))
                .is_none()
        );
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn feedthrough_keeps_accepting_without_resetting_timers() {
        let (mut ap, sent) = hovering(1.0);
        ap.on_external_command(ControlCommand::armed_thrust(5.0), t(100));
        ap.on_external_command(ControlCommand::default(), t(200));
        assert_eq!(ap.timers().switched_at(), t(100));
        // Sentinel commands are not filtered on this path.
        assert!(sent.lock().unwrap().last().unwrap().is_none());
    }

    #[test]
    fn external_command_rejected_while_flying_autonomously() {
        for mode in [Mode::Start, Mode::Land, Mode::EmergencyLand, Mode::RcManual] {
            let (mut ap, sent) = pilot();
            ap.set_mode(mode, t(0));
            assert!(
                ap.on_external_command(ControlCommand::armed_thrust(5.0), t(10))
                    .is_none()
            );
            assert_eq!(ap.mode(), mode);
            assert!(sent.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn land_in_feedthrough_is_a_no_op_but_off_exits() {
        let (mut ap, _) = pilot();
        ap.on_state_estimate(estimate(CoordinateFrame::World, 1.0, 0), t(0));
        ap.on_external_command(ControlCommand::armed_thrust(5.0), t(0));
        assert!(ap.request_land(t(10)).is_err());
        assert_eq!(ap.mode(), Mode::CommandFeedthrough);
        assert_eq!(ap.request_off(t(20)), Mode::Off);
    }

    // ── Transitions ─────────────────────────────────────────────────────────

    #[test]
    fn mode_switch_restarts_timers() {
        let (mut ap, _) = hovering(1.0);
        assert!(!ap.timers().is_first_tick());
        ap.set_mode(Mode::Land, t(700));
        assert!(ap.timers().is_first_tick());
        assert_eq!(ap.timers().switched_at(), t(700));
        assert!(ap.timers().ramp_down().is_none());
    }
}
