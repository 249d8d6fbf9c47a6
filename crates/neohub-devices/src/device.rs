//! Managed device model.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// One managed appliance.
///
/// `P` is the family-specific payload (readings, modes, schedules); the
/// registry and the agent never look inside it.
#[derive(Debug, Clone)]
pub struct Device<P> {
    /// Network address, possibly with a port (`192.168.1.20:49153`).
    pub ip: String,
    /// Stable identity used by the cloud protocol.
    pub uuid: String,
    pub model: String,
    pub firmware_version: String,
    pub last_touch: Instant,
    /// Set by a successful measurement capture, cleared once reported.
    pub measurements_updated: bool,
    pub payload: P,
}

impl<P: Default> Device<P> {
    /// Blank candidate for a freshly discovered address.
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            uuid: String::new(),
            model: String::new(),
            firmware_version: String::new(),
            last_touch: Instant::now(),
            measurements_updated: false,
            payload: P::default(),
        }
    }
}

impl<P> Device<P> {
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_firmware(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = firmware_version.into();
        self
    }

    /// Mark the device as alive at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_touch = now;
    }

    /// Summary without the payload, for logs and CLI output.
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            ip: self.ip.clone(),
            uuid: self.uuid.clone(),
            model: self.model.clone(),
            firmware_version: self.firmware_version.clone(),
        }
    }
}

/// Payload-free view of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub ip: String,
    pub uuid: String,
    pub model: String,
    pub firmware_version: String,
}
