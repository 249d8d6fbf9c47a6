//! The hub's own agent.
//!
//! The hub reports itself like any other device: a PROFILE heartbeat every
//! upload interval with its firmware, uptime, reboot count and interval.
//! The cloud can change the interval with a `set` command addressed to the
//! hub id.

use std::sync::Arc;
use std::time::Duration;

use neohub_core::telemetry::command_result_message;
use neohub_core::{
    Command, CommandListeners, MessageSink, ParamCategory, Result, ResultCode, TelemetryMessage,
};
use neohub_storage::HubSettings;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Command name that changes the upload interval.
pub const UPLOAD_INTERVAL_COMMAND: &str = "uploadInterval";

const HEARTBEAT_CAPACITY: usize = 1024;

struct HubState {
    upload_interval: Duration,
    last_command_id: i64,
}

/// Agent reporting the hub itself.
pub struct HubAgent {
    hub_id: String,
    firmware: String,
    settings: HubSettings,
    sink: Arc<dyn MessageSink>,
    started: Instant,
    reboots: u64,
    state: Mutex<HubState>,
    interval_changed: Notify,
}

impl HubAgent {
    /// Create the agent and count this start as one more reboot.
    pub fn start(
        hub_id: impl Into<String>,
        firmware: impl Into<String>,
        settings: HubSettings,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let reboots = settings.record_reboot();
        let upload_interval = settings.upload_interval();
        let hub_id = hub_id.into();
        info!(category = "agent", hub_id = %hub_id, reboots, ?upload_interval, "Hub agent started");
        Self {
            hub_id,
            firmware: firmware.into(),
            settings,
            sink,
            started: Instant::now(),
            reboots,
            state: Mutex::new(HubState {
                upload_interval,
                last_command_id: 0,
            }),
            interval_changed: Notify::new(),
        }
    }

    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    pub fn reboots(&self) -> u64 {
        self.reboots
    }

    pub fn upload_interval(&self) -> Duration {
        self.state.lock().upload_interval
    }

    /// Subscribe to `set` commands.
    pub fn subscribe(self: &Arc<Self>, listeners: &CommandListeners) -> Result<()> {
        let agent = Arc::clone(self);
        listeners.add(
            "set",
            Arc::new(move |command: &Command<'_>| agent.on_command(command)),
        )
    }

    /// Handle one dispatched command; anything not addressed to the hub is
    /// ignored.
    pub fn on_command(&self, command: &Command<'_>) {
        if command.is_sentinel() || command.device_id != self.hub_id {
            return;
        }
        {
            let mut state = self.state.lock();
            if command.command_id > 0 && command.command_id <= state.last_command_id {
                drop(state);
                warn!(command_id = command.command_id, "Duplicate hub command suppressed");
                self.report(command.command_id, ResultCode::HubError);
                return;
            }
            if command.command_id > 0 {
                state.last_command_id = command.command_id;
            }
        }

        if !command
            .command_name
            .eq_ignore_ascii_case(UPLOAD_INTERVAL_COMMAND)
        {
            debug!(name = %command.command_name, "Unsupported hub command");
            self.report(command.command_id, ResultCode::HubNotSupported);
            return;
        }

        self.report(command.command_id, ResultCode::Received);
        let secs = command
            .argument_str()
            .and_then(|arg| arg.trim().parse::<u64>().ok())
            .filter(|&secs| secs > 0);
        let Some(secs) = secs else {
            self.report(command.command_id, ResultCode::WrongFormat);
            return;
        };

        let interval = Duration::from_secs(secs);
        self.state.lock().upload_interval = interval;
        if let Err(e) = self.settings.set_upload_interval(interval) {
            warn!(error = %e, "Failed to persist upload interval");
        }
        self.interval_changed.notify_one();
        info!(category = "agent", ?interval, "Upload interval changed");
        self.report(command.command_id, ResultCode::Executed);
    }

    /// Build and send one heartbeat. Returns whether anything was sent.
    pub fn send_heartbeat(&self) -> bool {
        let device_type = self.settings.device_type();
        let alive = self.started.elapsed().as_secs();
        let interval = self.upload_interval().as_secs();

        let mut msg = TelemetryMessage::new(HEARTBEAT_CAPACITY);
        let fields: [(&str, String); 4] = [
            ("firmware", self.firmware.clone()),
            ("aliveTime", alive.to_string()),
            ("reboots", self.reboots.to_string()),
            ("uploadInterval", interval.to_string()),
        ];
        for (name, value) in fields {
            msg.add_value(
                &self.hub_id,
                &device_type,
                ParamCategory::Profile,
                name,
                None,
                None,
                value,
            );
        }
        match msg.send(self.sink.as_ref()) {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "Failed to send hub heartbeat");
                false
            }
        }
    }

    /// Send a heartbeat every upload interval until `cancel` fires.
    ///
    /// An interval change takes effect immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            self.send_heartbeat();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.upload_interval()) => {}
                _ = self.interval_changed.notified() => {}
            }
        }
        info!(category = "agent", "Hub agent stopped");
    }

    fn report(&self, command_id: i64, result: ResultCode) {
        if command_id < 0 {
            return;
        }
        if let Err(e) = self.sink.submit(command_result_message(command_id, result)) {
            warn!(command_id, error = %e, "Failed to report hub command result");
        }
    }
}
