//! [`BaseController`] – the feedback control law collaborator.
//!
//! The autopilot decides *which* reference point is tracked and *when*; the
//! base controller turns that reference plus the predicted state estimate
//! into a low-level [`ControlCommand`].  The autopilot treats it as a pure
//! function and never inspects its internals.

use rotorpilot_types::{ControlCommand, StateEstimate, TrajectoryPoint};

pub trait BaseController: Send {
    /// Tuning parameters of the control law, loaded once at startup.
    type Params: Send;

    /// Compute the command that makes `estimate` track `reference`.
    fn run(
        &self,
        estimate: &StateEstimate,
        reference: &TrajectoryPoint,
        params: &Self::Params,
    ) -> ControlCommand;
}
