//! [`AutopilotService`] – serialized event dispatcher.
//!
//! Every inbound channel (estimates, low-level feedback, operator requests,
//! external commands, reserved inputs) is an [`AutopilotEvent`] on a single
//! mpsc queue.  One Tokio task owns the [`Autopilot`] and drains that queue,
//! so exactly one handler mutates mode, timers and reference at a time and a
//! request is always applied before any estimate queued after it.
//!
//! ```text
//!  producers ──► AutopilotHandle ──► mpsc ──► AutopilotService ──► Autopilot
//!                                                 │
//!                                                 ├─ ModeTransitions ─► EventBus
//!                                                 └─ SystemAlerts ────► EventBus
//! ```
//!
//! When the autopilot is configured with a `state_estimate_timeout`, the task
//! also polls an [`EstimateWatchdog`] on a timer and forces emergency landing
//! when the estimator goes silent.
//!
//! [`AutopilotService::from_config`] assembles the whole pipeline from a
//! [`RuntimeConfig`]: predictor, bus, bus-backed command sink and queue size.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rotorpilot_kernel::{
    Autopilot, BaseController, Clock, CommandSink, ConstantVelocityPredictor, EstimateWatchdog,
    StatePredictor,
};
use rotorpilot_middleware::{BusCommandSink, EventBus, Topic};
use rotorpilot_types::{
    ControlCommand, Event, EventPayload, LowLevelFeedback, Mode, PilotError, PoseCommand,
    StateEstimate, TrajectoryPoint, VelocityCommand,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::RuntimeConfig;

const SOURCE: &str = "rotorpilot-runtime::service";

/// Lower bound on the watchdog poll period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Inbound queue size when none is configured.
pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// One inbound message for the autopilot.
#[derive(Debug, Clone)]
pub enum AutopilotEvent {
    StateEstimate(StateEstimate),
    LowLevelFeedback(LowLevelFeedback),
    Start,
    Land,
    Off,
    ExternalCommand(ControlCommand),
    PoseCommand(PoseCommand),
    VelocityCommand(VelocityCommand),
    ReferenceState(TrajectoryPoint),
    Trajectory(Vec<TrajectoryPoint>),
}

/// Owns the autopilot and applies inbound events to it one at a time.
pub struct AutopilotService<P, C: BaseController, S, K> {
    autopilot: Autopilot<P, C, S>,
    bus: EventBus,
    clock: K,
    watchdog: Option<EstimateWatchdog>,
    poll_interval: Duration,
    queue_capacity: usize,
}

impl<C, K> AutopilotService<ConstantVelocityPredictor, C, BusCommandSink, K>
where
    C: BaseController + 'static,
    C::Params: 'static,
    K: Clock + 'static,
{
    /// Build the service from startup configuration.
    ///
    /// Commands go out on [`Topic::ControlCommands`] of a bus sized by
    /// `bus_capacity`; [`spawn`][Self::spawn] uses `event_queue_capacity`.
    ///
    /// # Errors
    ///
    /// [`PilotError::Config`] when `config` fails validation.
    pub fn from_config(
        config: &RuntimeConfig,
        controller: C,
        controller_params: C::Params,
        clock: K,
    ) -> Result<Self, PilotError> {
        config.validate()?;
        let bus = EventBus::new(config.bus_capacity);
        let predictor =
            ConstantVelocityPredictor::new(config.autopilot.velocity_estimate_in_world_frame);
        let autopilot = Autopilot::new(
            config.autopilot.clone(),
            predictor,
            controller,
            controller_params,
            BusCommandSink::new(bus.clone()),
            clock.now(),
        )?;
        Ok(Self::new(autopilot, bus, clock).with_queue_capacity(config.event_queue_capacity))
    }
}

impl<P, C, S, K> AutopilotService<P, C, S, K>
where
    P: StatePredictor + 'static,
    C: BaseController + 'static,
    C::Params: 'static,
    S: CommandSink + 'static,
    K: Clock + 'static,
{
    /// Wrap `autopilot`.  A watchdog is armed when its configuration sets a
    /// `state_estimate_timeout`; it is polled four times per timeout.
    pub fn new(autopilot: Autopilot<P, C, S>, bus: EventBus, clock: K) -> Self {
        let watchdog = autopilot.config().estimate_timeout().map(EstimateWatchdog::new);
        let poll_interval = watchdog
            .as_ref()
            .and_then(|wd| (wd.timeout() / 4).to_std().ok())
            .unwrap_or(MIN_POLL_INTERVAL)
            .max(MIN_POLL_INTERVAL);
        Self {
            autopilot,
            bus,
            clock,
            watchdog,
            poll_interval,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Override the watchdog poll period.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Size of the inbound event queue created by [`spawn`][Self::spawn].
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn autopilot(&self) -> &Autopilot<P, C, S> {
        &self.autopilot
    }

    /// Outbound bus for mode transitions and alerts.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Spawn the dispatcher task.
    ///
    /// The task ends once every [`AutopilotHandle`] is dropped and hands the
    /// autopilot back through the join handle.
    pub fn spawn(self) -> (AutopilotHandle, JoinHandle<Autopilot<P, C, S>>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let task = tokio::spawn(self.run(rx));
        (AutopilotHandle { tx }, task)
    }

    /// Drain `events` until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<AutopilotEvent>) -> Autopilot<P, C, S> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let watching = self.watchdog.is_some();
        info!(watchdog = watching, "autopilot service started");

        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = ticker.tick(), if watching => self.check_watchdog(),
            }
        }

        info!(mode = %self.autopilot.mode(), "autopilot event queue closed, service stopping");
        self.autopilot
    }

    /// Apply one event to the autopilot, then announce what changed.
    pub fn handle(&mut self, event: AutopilotEvent) {
        let now = self.clock.now();
        let before = self.autopilot.mode();

        match event {
            AutopilotEvent::StateEstimate(estimate) => {
                self.autopilot.on_state_estimate(estimate, now);
                if self.autopilot.estimate_available() {
                    if let Some(wd) = self.watchdog.as_mut() {
                        wd.heartbeat(now);
                    }
                } else if self.autopilot.mode() == Mode::EmergencyLand && before != Mode::EmergencyLand {
                    self.alert("state_estimate", "invalid state estimate, emergency landing", now);
                }
            }
            AutopilotEvent::LowLevelFeedback(feedback) => {
                self.autopilot.on_low_level_feedback(&feedback, now);
            }
            AutopilotEvent::Start => {
                if let Err(e) = self.autopilot.request_start(now) {
                    debug!(error = %e, "start request rejected");
                }
            }
            AutopilotEvent::Land => {
                if let Err(e) = self.autopilot.request_land(now) {
                    debug!(error = %e, "land request rejected");
                }
            }
            AutopilotEvent::Off => {
                self.autopilot.request_off(now);
            }
            AutopilotEvent::ExternalCommand(command) => {
                self.autopilot.on_external_command(command, now);
            }
            AutopilotEvent::PoseCommand(pose) => self.autopilot.on_pose_command(&pose),
            AutopilotEvent::VelocityCommand(velocity) => {
                self.autopilot.on_velocity_command(&velocity)
            }
            AutopilotEvent::ReferenceState(reference) => {
                self.autopilot.on_reference_state(&reference)
            }
            AutopilotEvent::Trajectory(points) => self.autopilot.on_trajectory(&points),
        }

        self.announce(before, now);
    }

    fn check_watchdog(&mut self) {
        let now = self.clock.now();
        let Some(wd) = self.watchdog.as_mut() else {
            return;
        };
        if !wd.poll(now) {
            return;
        }
        let before = self.autopilot.mode();
        warn!(mode = %before, "no valid state estimate within timeout");
        if self.autopilot.on_estimate_timeout(now) {
            self.alert("state_estimate", "state estimate timed out", now);
            self.announce(before, now);
        }
    }

    fn announce(&self, before: Mode, now: DateTime<Utc>) {
        let after = self.autopilot.mode();
        if before != after {
            self.emit(
                Topic::ModeTransitions,
                EventPayload::ModeChanged { from: before, to: after },
                now,
            );
        }
    }

    fn alert(&self, component: &str, message: &str, now: DateTime<Utc>) {
        self.emit(
            Topic::SystemAlerts,
            EventPayload::Fault {
                component: component.to_string(),
                message: message.to_string(),
            },
            now,
        );
    }

    fn emit(&self, topic: Topic, payload: EventPayload, now: DateTime<Utc>) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, now, payload)) {
            trace!(error = %e, "event dropped");
        }
    }
}

/// Cloneable producer side of the autopilot event queue.
#[derive(Clone, Debug)]
pub struct AutopilotHandle {
    tx: mpsc::Sender<AutopilotEvent>,
}

impl AutopilotHandle {
    /// Queue `event`, waiting for space if the queue is full.
    ///
    /// # Errors
    ///
    /// [`PilotError::Channel`] once the service has stopped.
    pub async fn send(&self, event: AutopilotEvent) -> Result<(), PilotError> {
        self.tx
            .send(event)
            .await
            .map_err(|e| PilotError::Channel(format!("autopilot service stopped: {e}")))
    }

    /// Total slots of the inbound queue.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Queue `event` without waiting, for producers outside async code.
    ///
    /// # Errors
    ///
    /// [`PilotError::Channel`] when the queue is full or the service stopped.
    pub fn try_send(&self, event: AutopilotEvent) -> Result<(), PilotError> {
        self.tx
            .try_send(event)
            .map_err(|e| PilotError::Channel(format!("autopilot queue: {e}")))
    }

    pub async fn state_estimate(&self, estimate: StateEstimate) -> Result<(), PilotError> {
        self.send(AutopilotEvent::StateEstimate(estimate)).await
    }

    pub async fn low_level_feedback(&self, feedback: LowLevelFeedback) -> Result<(), PilotError> {
        self.send(AutopilotEvent::LowLevelFeedback(feedback)).await
    }

    pub async fn start(&self) -> Result<(), PilotError> {
        self.send(AutopilotEvent::Start).await
    }

    pub async fn land(&self) -> Result<(), PilotError> {
        self.send(AutopilotEvent::Land).await
    }

    pub async fn off(&self) -> Result<(), PilotError> {
        self.send(AutopilotEvent::Off).await
    }

    pub async fn external_command(&self, command: ControlCommand) -> Result<(), PilotError> {
        self.send(AutopilotEvent::ExternalCommand(command)).await
    }
}
