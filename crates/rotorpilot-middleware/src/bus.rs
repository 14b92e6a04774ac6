//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Each [`Topic`] is its own [`tokio::sync::broadcast`] channel, so every
//! subscriber of a topic receives every event on it and a slow subscriber
//! never blocks the autopilot.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::ControlCommands`] | Every command handed to the low-level controller |
//! | [`Topic::ModeTransitions`] | Flight-mode changes |
//! | [`Topic::SystemAlerts`] | Invalid estimates, estimator timeouts, transport faults |

use rotorpilot_types::{Event, PilotError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Outgoing control commands, one per tick or accepted external command.
    ControlCommands,
    /// `ModeChanged` notifications.
    ModeTransitions,
    /// Faults worth an operator's attention.
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    control_commands: broadcast::Sender<Event>,
    mode_transitions: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
    capacity: usize,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (control_commands, _) = broadcast::channel(capacity);
        let (mode_transitions, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            control_commands,
            mode_transitions,
            system_alerts,
            capacity,
        }
    }

    /// Events buffered per topic before slow subscribers start lagging.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish `event` to `topic`.
    ///
    /// Returns the number of receivers that were handed the event, or
    /// [`PilotError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, PilotError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| PilotError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::ControlCommands => &self.control_commands,
            Topic::ModeTransitions => &self.mode_transitions,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   events were dropped.
    /// * `Err(RecvError::Closed)` – every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
