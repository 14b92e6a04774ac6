//! `rotorpilot-runtime` – process-level wiring for the autopilot
//!
//! Hosts the [`Autopilot`][rotorpilot_kernel::Autopilot] inside a single
//! Tokio task and feeds it every inbound event in arrival order.
//!
//! # Modules
//!
//! - [`service`] – [`AutopilotService`][service::AutopilotService]: the sole
//!   owner of the autopilot.  Inbound events arrive on one mpsc queue and are
//!   handled to completion one at a time; mode transitions and faults go out
//!   on the [`EventBus`][rotorpilot_middleware::EventBus].  The cloneable
//!   [`AutopilotHandle`][service::AutopilotHandle] is the producer side.
//! - [`config`] – [`RuntimeConfig`][config::RuntimeConfig]: TOML loading with
//!   `ROTORPILOT_*` environment overrides.  A missing file or parameter is a
//!   fatal startup error.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod config;
pub mod service;
pub mod telemetry;

pub use config::RuntimeConfig;
pub use service::{AutopilotEvent, AutopilotHandle, AutopilotService};
pub use telemetry::{TracerProviderGuard, init_tracing};
