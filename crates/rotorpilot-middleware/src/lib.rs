//! `rotorpilot-middleware` – outbound message plumbing
//!
//! Carries everything the autopilot emits to whoever is listening, without
//! caring about its meaning.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`sink`] – [`BusCommandSink`]: a
//!   [`CommandSink`][rotorpilot_kernel::CommandSink] that publishes control
//!   commands onto the bus.

pub mod bus;
pub mod sink;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use sink::BusCommandSink;
