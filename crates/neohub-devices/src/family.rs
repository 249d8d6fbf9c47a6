//! Device family adapter interface.
//!
//! A family is one kind of appliance (thermostat, smart outlet, generic
//! gadget). The agent, registry and discovery code are shared; everything
//! that depends on how a particular family talks lives behind
//! [`DeviceFamily`].

use async_trait::async_trait;
use neohub_core::{CommandEvent, ParamCategory, ResultCode, TelemetryMessage};
use thiserror::Error;

use crate::device::Device;

/// Device adapter error types.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The device could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The device was reached but rejected or failed the request.
    #[error("Execution error: {0}")]
    Execution(String),

    /// The command or the device reply was not in the expected shape.
    #[error("Malformed: {0}")]
    Malformed(String),

    /// The device does not support the operation.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Request timed out.
    #[error("Timeout after {0}s")]
    Timeout(u64),
}

impl AdapterError {
    /// Result code reported to the cloud for a command that failed this way.
    pub fn result_code(&self) -> ResultCode {
        match self {
            AdapterError::Connection(_) | AdapterError::Timeout(_) => {
                ResultCode::DeviceConnectionError
            }
            AdapterError::Execution(_) => ResultCode::DeviceExecutionError,
            AdapterError::Malformed(_) => ResultCode::WrongFormat,
            AdapterError::NotSupported(_) => ResultCode::DeviceNotSupported,
        }
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Adapter for one family of devices.
#[async_trait]
pub trait DeviceFamily: Send + Sync + 'static {
    /// Family-specific device payload.
    type Payload: Clone + Default + Send + Sync + 'static;

    /// Short family name for logs.
    fn name(&self) -> &str;

    /// Device type reported in telemetry.
    fn device_type(&self) -> &str;

    /// Datagram multicast to find devices of this family.
    fn probe(&self) -> Vec<u8>;

    /// Confirm that `ip` is a device of this family and read its static
    /// attributes. `Ok(None)` means "not one of ours".
    async fn capture_details(&self, ip: &str) -> AdapterResult<Option<Device<Self::Payload>>>;

    /// Read current values into the device payload.
    async fn capture_measurements(&self, device: &mut Device<Self::Payload>) -> AdapterResult<()>;

    /// Append the device's measurements to `msg`. Returns bytes written.
    fn write_measurements(&self, device: &Device<Self::Payload>, msg: &mut TelemetryMessage)
        -> usize;

    /// Append the device's profile to `msg`. Returns bytes written.
    fn write_profile(&self, device: &Device<Self::Payload>, msg: &mut TelemetryMessage) -> usize {
        let mut written = 0;
        for (name, value) in [
            ("internalUrl", device.ip.as_str()),
            ("model", device.model.as_str()),
            ("firmware", device.firmware_version.as_str()),
        ] {
            written += msg.add_value(
                &device.uuid,
                self.device_type(),
                ParamCategory::Profile,
                name,
                None,
                None,
                value,
            );
        }
        written
    }

    /// Execute one dispatched command on `device`.
    async fn apply_command(
        &self,
        device: &Device<Self::Payload>,
        command: &CommandEvent,
    ) -> AdapterResult<()>;

    /// Called once per inbound batch, after its last command.
    ///
    /// Families that buffer related settings commit them here.
    async fn finish_batch(&self) -> AdapterResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(
            AdapterError::Connection("refused".into()).result_code(),
            ResultCode::DeviceConnectionError
        );
        assert_eq!(
            AdapterError::Timeout(3).result_code(),
            ResultCode::DeviceConnectionError
        );
        assert_eq!(
            AdapterError::Execution("no".into()).result_code(),
            ResultCode::DeviceExecutionError
        );
        assert_eq!(
            AdapterError::Malformed("arg".into()).result_code(),
            ResultCode::WrongFormat
        );
    }
}
