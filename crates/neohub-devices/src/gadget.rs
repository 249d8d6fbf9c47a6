//! Generic HTTP gadget family.
//!
//! Gadgets answer an SSDP search and expose three JSON endpoints:
//!
//! - `GET /sys` returns `{"uuid": .., "model": .., "fw_version": ..}`
//! - `GET /status` returns a flat object of current readings
//! - `POST /set` takes `{"<name><index>": <value>}` and answers with a body
//!   containing `success` when the setting was applied

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use neohub_core::config::agent::{DEVICE_HTTP_TIMEOUT_SECS, DEVICE_TYPE};
use neohub_core::{CommandEvent, ParamCategory, TelemetryMessage};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::device::Device;
use crate::family::{AdapterError, AdapterResult, DeviceFamily};

const SEARCH_TARGET: &str = "urn:schemas-upnp-org:device:Basic:1";

/// Latest readings of one gadget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GadgetReadings {
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SysInfo {
    uuid: Option<String>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    fw_version: String,
}

/// HTTP gadget adapter.
pub struct HttpGadgetFamily {
    client: Client,
    device_type: String,
    timeout: Duration,
}

impl Default for HttpGadgetFamily {
    fn default() -> Self {
        Self::new(
            DEVICE_TYPE.to_string(),
            Duration::from_secs(DEVICE_HTTP_TIMEOUT_SECS),
        )
    }
}

impl HttpGadgetFamily {
    pub fn new(device_type: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_default();
        Self {
            client,
            device_type,
            timeout,
        }
    }

    fn map_error(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout(self.timeout.as_secs())
        } else if e.is_connect() || e.is_request() {
            AdapterError::Connection(e.to_string())
        } else if e.is_decode() {
            AdapterError::Malformed(e.to_string())
        } else {
            AdapterError::Execution(e.to_string())
        }
    }

    async fn get_json(&self, ip: &str, path: &str) -> AdapterResult<Value> {
        let url = format!("http://{}{}", ip, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        if !response.status().is_success() {
            return Err(AdapterError::NotSupported(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        response.json::<Value>().await.map_err(|e| self.map_error(e))
    }
}

/// Render a JSON scalar as telemetry text; objects and arrays are skipped.
fn reading_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

/// JSON value for a command argument: numbers and booleans stay typed.
fn argument_value(argument: &str) -> Value {
    serde_json::from_str::<Value>(argument)
        .ok()
        .filter(|v| v.is_number() || v.is_boolean())
        .unwrap_or_else(|| Value::String(argument.to_string()))
}

#[async_trait]
impl DeviceFamily for HttpGadgetFamily {
    type Payload = GadgetReadings;

    fn name(&self) -> &str {
        "gadget"
    }

    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn probe(&self) -> Vec<u8> {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: 3\r\n\
             ST: {}\r\n\r\n",
            SEARCH_TARGET
        )
        .into_bytes()
    }

    async fn capture_details(&self, ip: &str) -> AdapterResult<Option<Device<GadgetReadings>>> {
        let value = self.get_json(ip, "/sys").await?;
        let info: SysInfo = serde_json::from_value(value)
            .map_err(|e| AdapterError::Malformed(e.to_string()))?;
        let Some(uuid) = info.uuid.filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        Ok(Some(
            Device::new(ip)
                .with_uuid(uuid)
                .with_model(info.model)
                .with_firmware(info.fw_version),
        ))
    }

    async fn capture_measurements(&self, device: &mut Device<GadgetReadings>) -> AdapterResult<()> {
        let value = self.get_json(&device.ip, "/status").await?;
        let Value::Object(map) = value else {
            return Err(AdapterError::Malformed("status is not an object".to_string()));
        };
        device.payload.values = map
            .iter()
            .filter_map(|(k, v)| reading_text(v).map(|text| (k.clone(), text)))
            .collect();
        Ok(())
    }

    fn write_measurements(&self, device: &Device<GadgetReadings>, msg: &mut TelemetryMessage) -> usize {
        device
            .payload
            .values
            .iter()
            .map(|(name, value)| {
                msg.add_value(
                    &device.uuid,
                    &self.device_type,
                    ParamCategory::Measure,
                    name,
                    None,
                    None,
                    value,
                )
            })
            .sum()
    }

    async fn apply_command(
        &self,
        device: &Device<GadgetReadings>,
        command: &CommandEvent,
    ) -> AdapterResult<()> {
        let argument = command
            .argument
            .as_deref()
            .ok_or_else(|| AdapterError::Malformed("command has no argument".to_string()))?;

        let mut key = command.command_name.clone();
        if let Some(index) = command.index {
            key.push(index);
        }
        let mut fields = serde_json::Map::new();
        fields.insert(key, argument_value(argument));
        let body = Value::Object(fields);

        let url = format!("http://{}/set", device.ip);
        debug!(url = %url, body = %body, "Applying command");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let text = response.text().await.map_err(|e| self.map_error(e))?;
        if text.contains("success") {
            Ok(())
        } else {
            Err(AdapterError::Execution(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_text() {
        assert_eq!(reading_text(&serde_json::json!(21.5)), Some("21.5".into()));
        assert_eq!(reading_text(&serde_json::json!("on")), Some("on".into()));
        assert_eq!(reading_text(&serde_json::json!(true)), Some("1".into()));
        assert_eq!(reading_text(&serde_json::json!({"a": 1})), None);
    }

    #[test]
    fn test_argument_value() {
        assert_eq!(argument_value("72"), serde_json::json!(72));
        assert_eq!(argument_value("true"), serde_json::json!(true));
        assert_eq!(argument_value("heat"), serde_json::json!("heat"));
    }

    #[test]
    fn test_probe_is_ssdp_search() {
        let probe = String::from_utf8(HttpGadgetFamily::default().probe()).unwrap();
        assert!(probe.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(probe.contains("ST: urn:schemas-upnp-org:device:Basic:1"));
        assert!(probe.ends_with("\r\n\r\n"));
    }
}
