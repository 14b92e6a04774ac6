//! [`BusCommandSink`] – control-command transport over the [`EventBus`].

use rotorpilot_kernel::CommandSink;
use rotorpilot_types::{ControlCommand, Event, EventPayload, PilotError};
use tracing::trace;

use crate::bus::{EventBus, Topic};

const SOURCE: &str = "rotorpilot-middleware::sink";

/// Wraps each command in an [`Event`] on [`Topic::ControlCommands`].
///
/// The event timestamp is the command's issue timestamp, so replayed runs
/// produce identical event streams apart from the ids.
#[derive(Clone, Debug)]
pub struct BusCommandSink {
    bus: EventBus,
}

impl BusCommandSink {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl CommandSink for BusCommandSink {
    fn send(&mut self, command: &ControlCommand) -> Result<(), PilotError> {
        let event = Event::new(
            SOURCE,
            command.timestamp,
            EventPayload::ControlCommand(command.clone()),
        );
        let receivers = self.bus.publish_to(Topic::ControlCommands, event)?;
        trace!(receivers, thrust = command.collective_thrust, "control command sent");
        Ok(())
    }
}
