//! Shared fixtures for device tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use neohub_core::{CommandEvent, MessageSink, ParamCategory, Result, TelemetryMessage};
use neohub_devices::{AdapterError, AdapterResult, Device, DeviceFamily};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Sink that keeps every submitted payload as text.
#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }
}

impl MessageSink for RecordingSink {
    fn submit(&self, payload: Bytes) -> Result<()> {
        self.messages
            .lock()
            .push(String::from_utf8_lossy(&payload).into_owned());
        Ok(())
    }
}

/// In-memory device family driven by the test.
///
/// Known devices are keyed by address. Measurements count up by one per
/// capture; devices listed as offline fail every request.
#[derive(Default)]
pub struct ScriptedFamily {
    pub known: Mutex<HashMap<String, String>>,
    pub offline: Mutex<HashSet<String>>,
    pub rejected_names: Mutex<HashSet<String>>,
    pub applied: Mutex<Vec<CommandEvent>>,
    pub batches: AtomicUsize,
}

impl ScriptedFamily {
    pub fn with_device(self, ip: &str, uuid: &str) -> Self {
        self.known.lock().insert(ip.to_string(), uuid.to_string());
        self
    }

    pub fn set_offline(&self, uuid: &str) {
        self.offline.lock().insert(uuid.to_string());
    }

    pub fn reject(&self, name: &str) {
        self.rejected_names.lock().insert(name.to_string());
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceFamily for ScriptedFamily {
    type Payload = u32;

    fn name(&self) -> &str {
        "scripted"
    }

    fn device_type(&self) -> &str {
        "3"
    }

    fn probe(&self) -> Vec<u8> {
        b"M-SEARCH * HTTP/1.1\r\nST: scripted\r\n\r\n".to_vec()
    }

    async fn capture_details(&self, ip: &str) -> AdapterResult<Option<Device<u32>>> {
        Ok(self
            .known
            .lock()
            .get(ip)
            .map(|uuid| Device::new(ip).with_uuid(uuid.clone()).with_model("scripted")))
    }

    async fn capture_measurements(&self, device: &mut Device<u32>) -> AdapterResult<()> {
        if self.offline.lock().contains(&device.uuid) {
            return Err(AdapterError::Connection("unreachable".into()));
        }
        device.payload += 1;
        Ok(())
    }

    fn write_measurements(&self, device: &Device<u32>, msg: &mut TelemetryMessage) -> usize {
        msg.add_value(
            &device.uuid,
            self.device_type(),
            ParamCategory::Measure,
            "reading",
            None,
            None,
            device.payload,
        )
    }

    async fn apply_command(&self, _device: &Device<u32>, command: &CommandEvent) -> AdapterResult<()> {
        if self.rejected_names.lock().contains(&command.command_name) {
            return Err(AdapterError::Execution("rejected".into()));
        }
        self.applied.lock().push(command.clone());
        Ok(())
    }

    async fn finish_batch(&self) -> AdapterResult<()> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A device already seen alive at `at`.
pub fn device_at(ip: &str, uuid: &str, at: Instant) -> Device<u32> {
    let mut device = Device::new(ip).with_uuid(uuid);
    device.touch(at);
    device
}

/// A `set` command addressed to `device_id`.
pub fn set_command(id: i64, device_id: &str, name: &str, argument: Option<&str>) -> CommandEvent {
    CommandEvent {
        command_id: id,
        user_is_watching: false,
        no_more_commands: false,
        device_id: device_id.to_string(),
        command_type: "set".to_string(),
        command_name: name.to_string(),
        index: None,
        argument: argument.map(str::to_string),
    }
}
