//! Periodic device agent.
//!
//! One agent manages one device family. Its loop wakes every few seconds
//! and, under a single lock, runs whatever is due:
//!
//! 1. discovery, which adds or refreshes devices in the registry;
//! 2. the heartbeat, a PROFILE message describing every tracked device;
//! 3. measurement, which captures readings, evicts devices that stopped
//!    answering, and sends a MEASURE message for the updated ones.
//!
//! Commands arrive through the command listeners, are copied into a
//! channel and executed one at a time by a worker task, so that every
//! batch's sentinel is handled after the batch's commands.

use std::sync::Arc;
use std::time::Duration;

use neohub_core::config::agent as defaults;
use neohub_core::listeners::prefix_matches;
use neohub_core::telemetry::{add_device_message, command_result_message, device_gone_message};
use neohub_core::{
    Command, CommandEvent, CommandListener, CommandListeners, MessageSink, ResultCode, Result,
    TelemetryMessage,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceInfo};
use crate::discovery::Discovery;
use crate::family::DeviceFamily;
use crate::registry::{AddOutcome, DeviceRegistry, RegistryEvent};
use crate::tracker::CommandTracker;

/// Command type prefix for device settings.
pub const SET_PREFIX: &str = "set";
/// Command type prefix that forces a discovery pass.
pub const DISCOVER_PREFIX: &str = "discover";

const COMMAND_QUEUE_DEPTH: usize = 64;

/// Agent periods and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,
    /// Devices not touched for this long are evicted.
    #[serde(default = "default_death_period_secs")]
    pub death_period_secs: u64,
    #[serde(default = "default_discovery_period_secs")]
    pub discovery_period_secs: u64,
    #[serde(default = "default_heartbeat_period_secs")]
    pub heartbeat_period_secs: u64,
    #[serde(default = "default_measurement_period_secs")]
    pub measurement_period_secs: u64,
    #[serde(default = "default_loop_sleep_secs")]
    pub loop_sleep_secs: u64,
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: usize,
}

fn default_registry_capacity() -> usize {
    defaults::REGISTRY_CAPACITY
}

fn default_death_period_secs() -> u64 {
    defaults::DEATH_PERIOD_SECS
}

fn default_discovery_period_secs() -> u64 {
    defaults::DISCOVERY_PERIOD_SECS
}

fn default_heartbeat_period_secs() -> u64 {
    defaults::HEARTBEAT_PERIOD_SECS
}

fn default_measurement_period_secs() -> u64 {
    defaults::MEASUREMENT_PERIOD_SECS
}

fn default_loop_sleep_secs() -> u64 {
    defaults::LOOP_SLEEP_SECS
}

fn default_max_msg_size() -> usize {
    defaults::MAX_MSG_SIZE
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            registry_capacity: default_registry_capacity(),
            death_period_secs: default_death_period_secs(),
            discovery_period_secs: default_discovery_period_secs(),
            heartbeat_period_secs: default_heartbeat_period_secs(),
            measurement_period_secs: default_measurement_period_secs(),
            loop_sleep_secs: default_loop_sleep_secs(),
            max_msg_size: default_max_msg_size(),
        }
    }
}

impl AgentConfig {
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    pub fn with_death_period(mut self, period: Duration) -> Self {
        self.death_period_secs = period.as_secs();
        self
    }

    pub fn death_period(&self) -> Duration {
        Duration::from_secs(self.death_period_secs)
    }

    pub fn discovery_period(&self) -> Duration {
        Duration::from_secs(self.discovery_period_secs)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }

    pub fn measurement_period(&self) -> Duration {
        Duration::from_secs(self.measurement_period_secs)
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_secs(self.loop_sleep_secs.max(1))
    }
}

/// What one periodic pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// New devices found, if discovery ran and succeeded.
    pub discovered: Option<usize>,
    pub heartbeat_sent: bool,
    /// Devices whose measurements were captured.
    pub measured: usize,
    pub evicted: usize,
    pub measurement_sent: bool,
}

#[derive(Debug, Default)]
struct Timers {
    last_discovery: Option<Instant>,
    last_heartbeat: Option<Instant>,
    last_measurement: Option<Instant>,
}

fn due(last: Option<Instant>, period: Duration, now: Instant) -> bool {
    last.map_or(true, |t| now.saturating_duration_since(t) >= period)
}

struct AgentState<P> {
    registry: DeviceRegistry<P>,
    events: broadcast::Receiver<RegistryEvent>,
    tracker: CommandTracker,
    timers: Timers,
}

/// Copies dispatched commands into the agent's queue.
struct ForwardingListener {
    tx: mpsc::Sender<CommandEvent>,
}

impl CommandListener for ForwardingListener {
    fn on_command(&self, command: &Command<'_>) {
        if let Err(e) = self.tx.try_send(command.to_owned_event()) {
            warn!(command_id = command.command_id, error = %e, "Dropping command");
        }
    }
}

/// Agent for one device family.
pub struct DeviceAgent<F: DeviceFamily> {
    family: F,
    discovery: Discovery,
    sink: Arc<dyn MessageSink>,
    config: AgentConfig,
    state: Mutex<AgentState<F::Payload>>,
}

impl<F: DeviceFamily> DeviceAgent<F> {
    pub fn new(
        family: F,
        discovery: Discovery,
        sink: Arc<dyn MessageSink>,
        config: AgentConfig,
    ) -> Self {
        let registry = DeviceRegistry::new(config.registry_capacity);
        let events = registry.subscribe();
        Self {
            family,
            discovery,
            sink,
            config,
            state: Mutex::new(AgentState {
                registry,
                events,
                tracker: CommandTracker::new(),
                timers: Timers::default(),
            }),
        }
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Subscribe the agent to its command types.
    ///
    /// The returned receiver feeds [`DeviceAgent::run`].
    pub fn subscribe(&self, listeners: &CommandListeners) -> Result<mpsc::Receiver<CommandEvent>> {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        listeners.add(SET_PREFIX, Arc::new(ForwardingListener { tx: tx.clone() }))?;
        listeners.add(DISCOVER_PREFIX, Arc::new(ForwardingListener { tx }))?;
        Ok(rx)
    }

    /// Track a device without discovering it first.
    pub async fn add_device(&self, device: Device<F::Payload>) -> Result<AddOutcome> {
        let mut state = self.state.lock().await;
        let outcome = state.registry.add(device)?;
        self.process_events(&mut state);
        Ok(outcome)
    }

    /// Payload-free snapshot of the tracked devices.
    pub async fn devices(&self) -> Vec<DeviceInfo> {
        self.state.lock().await.registry.iter().map(Device::info).collect()
    }

    /// Run the loop until `cancel` fires.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<CommandEvent>,
        cancel: CancellationToken,
    ) {
        info!(category = "agent", family = self.family.name(), "Device agent started");

        let worker = {
            let agent = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        command = commands.recv() => match command {
                            Some(command) => agent.handle_command(command).await,
                            None => break,
                        },
                    }
                }
            })
        };

        while !cancel.is_cancelled() {
            let report = self.run_pass(Instant::now()).await;
            debug!(family = self.family.name(), ?report, "Agent pass");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.loop_sleep()) => {}
            }
        }

        let _ = worker.await;
        info!(category = "agent", family = self.family.name(), "Device agent stopped");
    }

    /// One periodic pass: discovery, heartbeat and measurement, each only
    /// when its period has elapsed.
    pub async fn run_pass(&self, now: Instant) -> PassReport {
        let mut report = PassReport::default();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if due(state.timers.last_discovery, self.config.discovery_period(), now) {
            state.timers.last_discovery = Some(now);
            match self.discovery.run(&self.family, &mut state.registry).await {
                Ok(found) => report.discovered = Some(found.added),
                Err(e) => warn!(category = "discovery", family = self.family.name(), error = %e, "Discovery failed"),
            }
            self.process_events(state);
        }

        if due(state.timers.last_heartbeat, self.config.heartbeat_period(), now) {
            state.timers.last_heartbeat = Some(now);
            report.heartbeat_sent = self.send_heartbeat(&state.registry);
        }

        if due(state.timers.last_measurement, self.config.measurement_period(), now) {
            state.timers.last_measurement = Some(now);
            for device in state.registry.iter_mut() {
                match self.family.capture_measurements(device).await {
                    Ok(()) => {
                        device.touch(now);
                        device.measurements_updated = true;
                        report.measured += 1;
                    }
                    Err(e) => debug!(uuid = %device.uuid, error = %e, "Measurement failed"),
                }
            }
            report.evicted = state
                .registry
                .garbage_collect(now, self.config.death_period())
                .len();
            self.process_events(state);
            report.measurement_sent = self.send_measurements(&mut state.registry);
        }

        report
    }

    /// Execute one command taken from the queue.
    pub async fn handle_command(&self, command: CommandEvent) {
        if command.is_sentinel() {
            let mut state = self.state.lock().await;
            state.tracker.end_batch();
            if command.user_is_watching {
                // someone is looking: push fresh readings on the next pass
                state.timers.last_measurement = None;
            }
            drop(state);
            if let Err(e) = self.family.finish_batch().await {
                warn!(family = self.family.name(), error = %e, "Failed to commit batch");
            }
            return;
        }

        if prefix_matches(DISCOVER_PREFIX, &command.command_type) {
            info!(category = "agent", family = self.family.name(), "Discovery requested");
            self.state.lock().await.timers.last_discovery = None;
            return;
        }
        if !prefix_matches(SET_PREFIX, &command.command_type) {
            return;
        }

        let device = {
            let mut state = self.state.lock().await;
            let Some(device) = state.registry.get_by_uuid(&command.device_id).cloned() else {
                // addressed to a device some other agent owns
                debug!(device = %command.device_id, "Command for unknown device");
                return;
            };
            if !state.tracker.admit(
                &command.device_id,
                command.command_id,
                &command.command_name,
                command.index,
            ) {
                drop(state);
                warn!(
                    device = %command.device_id,
                    command_id = command.command_id,
                    "Duplicate command suppressed"
                );
                self.report(command.command_id, ResultCode::HubError);
                return;
            }
            device
        };

        if command.argument.is_none() {
            self.report(command.command_id, ResultCode::WrongFormat);
            return;
        }

        let result = match self.family.apply_command(&device, &command).await {
            Ok(()) => ResultCode::Executed,
            Err(e) => {
                warn!(device = %device.uuid, command_id = command.command_id, error = %e, "Command failed");
                e.result_code()
            }
        };
        self.report(command.command_id, result);
    }

    fn report(&self, command_id: i64, result: ResultCode) {
        if command_id < 0 {
            return;
        }
        if let Err(e) = self.sink.submit(command_result_message(command_id, result)) {
            warn!(command_id, error = %e, "Failed to report command result");
        }
    }

    fn process_events(&self, state: &mut AgentState<F::Payload>) {
        loop {
            match state.events.try_recv() {
                Ok(RegistryEvent::Added { uuid, .. }) => {
                    self.submit(add_device_message(&uuid, self.family.device_type()));
                    // report the new device right away
                    state.timers.last_heartbeat = None;
                    state.timers.last_measurement = None;
                }
                Ok(RegistryEvent::Gone { uuid, .. }) => {
                    self.submit(device_gone_message(&uuid));
                    state.tracker.forget(&uuid);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "Registry events lagged");
                }
                Err(_) => break,
            }
        }
    }

    fn submit(&self, payload: bytes::Bytes) {
        if let Err(e) = self.sink.submit(payload) {
            warn!(error = %e, "Failed to submit message");
        }
    }

    fn send_heartbeat(&self, registry: &DeviceRegistry<F::Payload>) -> bool {
        let mut msg = TelemetryMessage::new(self.config.max_msg_size);
        for device in registry.iter() {
            if self.family.write_profile(device, &mut msg) == 0 {
                warn!(uuid = %device.uuid, "Heartbeat message full");
            }
        }
        self.send(msg)
    }

    fn send_measurements(&self, registry: &mut DeviceRegistry<F::Payload>) -> bool {
        let mut msg = TelemetryMessage::new(self.config.max_msg_size);
        for device in registry.iter_mut().filter(|d| d.measurements_updated) {
            self.family.write_measurements(device, &mut msg);
            device.measurements_updated = false;
        }
        self.send(msg)
    }

    fn send(&self, msg: TelemetryMessage) -> bool {
        match msg.send(self.sink.as_ref()) {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "Failed to send telemetry");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due() {
        let now = Instant::now();
        let period = Duration::from_secs(60);
        assert!(due(None, period, now));
        assert!(!due(Some(now), period, now + Duration::from_secs(59)));
        assert!(due(Some(now), period, now + Duration::from_secs(60)));
    }

    #[test]
    fn test_config_defaults() {
        let config: AgentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.registry_capacity, 8);
        assert_eq!(config.death_period(), Duration::from_secs(300));
        assert_eq!(config.heartbeat_period(), Duration::from_secs(300));
        assert_eq!(config.measurement_period(), Duration::from_secs(60));
    }
}
