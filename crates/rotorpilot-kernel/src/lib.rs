//! `rotorpilot-kernel` – Flight-Mode Safety Core
//!
//! Decides, on every new state estimate, which flight behavior is active and
//! which control command goes out to the low-level controller.  Everything in
//! this crate is synchronous, non-blocking and deterministic: wall-clock time
//! is always passed in by the caller.
//!
//! # Modules
//!
//! - [`autopilot`] – [`Autopilot`][autopilot::Autopilot]: the mode state
//!   machine.  Owns the active [`Mode`][rotorpilot_types::Mode], the
//!   [`ModeTimers`], the authoritative reference point and the collaborators.
//! - [`reference`] – per-mode reference generators (takeoff ramp, hover hold,
//!   landing descent with propeller ramp-down).
//! - [`publisher`] – [`CommandPublisher`]: suppresses sentinel commands, feeds
//!   issued commands back into the predictor and remembers the last thrust.
//! - [`predictor`] – the [`StatePredictor`] collaborator contract and a
//!   [`ConstantVelocityPredictor`] reference implementation.
//! - [`controller`] – the [`BaseController`] collaborator contract.
//! - [`watchdog`] – [`EstimateWatchdog`]: detects a silent estimator link.
//! - [`timers`] – [`ModeTimers`]: mode-switch time, first-tick latch and the
//!   landing ramp-down latch.
//! - [`config`] – [`AutopilotConfig`]: immutable startup parameters.
//! - [`clock`] – [`Clock`] time sources for the runtime and for tests.

pub mod autopilot;
pub mod clock;
pub mod config;
pub mod controller;
pub mod predictor;
pub mod publisher;
pub mod reference;
pub mod timers;
pub mod watchdog;

pub use autopilot::Autopilot;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AutopilotConfig;
pub use controller::BaseController;
pub use predictor::{ConstantVelocityPredictor, StatePredictor};
pub use publisher::{CommandPublisher, CommandSink};
pub use timers::ModeTimers;
pub use watchdog::{EstimateHealth, EstimateWatchdog};
