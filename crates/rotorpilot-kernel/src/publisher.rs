//! [`CommandPublisher`] – the single exit point for periodic commands.
//!
//! [`CommandPublisher::publish`] enforces the outbound rules in order:
//!
//! 1. A command tagged [`ControlMode::None`][rotorpilot_types::ControlMode::None]
//!    is logged and dropped; nothing reaches the transport.
//! 2. The command is handed to the [`CommandSink`].
//! 3. The command is pushed into the predictor queue so later predictions
//!    account for it.
//! 4. Its collective thrust becomes the *last issued thrust*, the starting
//!    point of a landing ramp-down.
//!
//! Externally supplied feedthrough commands use [`CommandPublisher::transmit`]
//! instead, which only performs step 2.

use rotorpilot_types::{ControlCommand, PilotError};
use tracing::{error, warn};

use crate::predictor::StatePredictor;

/// Transport for outgoing control commands.
///
/// Any `FnMut(&ControlCommand) -> Result<(), PilotError>` closure is a sink,
/// which keeps test doubles to a single line.
pub trait CommandSink: Send {
    fn send(&mut self, command: &ControlCommand) -> Result<(), PilotError>;
}

impl<F> CommandSink for F
where
    F: FnMut(&ControlCommand) -> Result<(), PilotError> + Send,
{
    fn send(&mut self, command: &ControlCommand) -> Result<(), PilotError> {
        self(command)
    }
}

/// Applies the outbound rules in front of a [`CommandSink`].
pub struct CommandPublisher<S> {
    sink: S,
    last_issued_thrust: f64,
}

impl<S: CommandSink> CommandPublisher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            last_issued_thrust: 0.0,
        }
    }

    /// Publish `command` and feed it back into `predictor`.
    ///
    /// Returns the command when it was issued, `None` when it was suppressed.
    pub fn publish<P: StatePredictor>(
        &mut self,
        command: ControlCommand,
        predictor: &mut P,
    ) -> Option<ControlCommand> {
        if command.is_none() {
            error!("Control mode is NONE, will not publish ControlCommand");
            return None;
        }
        self.transmit(&command);
        predictor.push_issued_command(&command);
        self.last_issued_thrust = command.collective_thrust;
        Some(command)
    }

    /// Hand `command` to the sink verbatim, without any of the publish rules.
    pub fn transmit(&mut self, command: &ControlCommand) {
        if let Err(e) = self.sink.send(command) {
            warn!(error = %e, "control command transport failed");
        }
    }

    /// Thrust of the last command that went through [`publish`][Self::publish].
    pub fn last_issued_thrust(&self) -> f64 {
        self.last_issued_thrust
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
