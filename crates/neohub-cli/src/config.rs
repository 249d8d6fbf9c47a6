//! Gateway configuration.
//!
//! Sources, highest priority first: command-line flags, `NEOHUB_*`
//! environment variables, the TOML file, built-in defaults.
//!
//! ```toml
//! [relay]
//! port = 60110
//!
//! [cloud]
//! url = "developer.peoplepowerco.com:8080/deviceio/ml"
//!
//! [agent]
//! discovery_period_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use neohub_core::config::{agent as agent_defaults, discovery as discovery_defaults, env_vars, hub};
use neohub_devices::{AgentConfig, DiscoveryConfig};
use neohub_relay::{CloudConfig, RelayConfig};
use serde::{Deserialize, Serialize};

/// File read when no path is given on the command line or in the environment.
pub const DEFAULT_CONFIG_FILE: &str = "neohub.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub agent: GadgetAgentConfig,
    /// File the configuration was read from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            relay: RelayConfig::default(),
            cloud: CloudConfig::default(),
            hub: HubConfig::default(),
            agent: GadgetAgentConfig::default(),
            source: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Fixed hub id; derived from a MAC address when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

fn default_firmware_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_settings_path() -> String {
    hub::DEFAULT_SETTINGS_PATH.to_string()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            id: None,
            firmware_version: default_firmware_version(),
            settings_path: default_settings_path(),
        }
    }
}

/// Settings of the generic gadget agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GadgetAgentConfig {
    #[serde(flatten)]
    pub periods: AgentConfig,
    #[serde(default = "default_device_type")]
    pub device_type: u32,
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: String,
    #[serde(default = "default_location_header")]
    pub location_header: String,
    #[serde(default = "default_discovery_window_ms")]
    pub discovery_window_ms: u64,
    #[serde(default = "default_discovery_poll_ms")]
    pub discovery_poll_ms: u64,
    #[serde(default = "default_device_http_timeout_secs")]
    pub device_http_timeout_secs: u64,
}

fn default_device_type() -> u32 {
    agent_defaults::DEVICE_TYPE
}

fn default_multicast_addr() -> String {
    discovery_defaults::MULTICAST_ADDR.to_string()
}

fn default_location_header() -> String {
    discovery_defaults::LOCATION_HEADER.to_string()
}

fn default_discovery_window_ms() -> u64 {
    discovery_defaults::WINDOW_MS
}

fn default_discovery_poll_ms() -> u64 {
    discovery_defaults::POLL_MS
}

fn default_device_http_timeout_secs() -> u64 {
    agent_defaults::DEVICE_HTTP_TIMEOUT_SECS
}

impl Default for GadgetAgentConfig {
    fn default() -> Self {
        Self {
            periods: AgentConfig::default(),
            device_type: default_device_type(),
            multicast_addr: default_multicast_addr(),
            location_header: default_location_header(),
            discovery_window_ms: default_discovery_window_ms(),
            discovery_poll_ms: default_discovery_poll_ms(),
            device_http_timeout_secs: default_device_http_timeout_secs(),
        }
    }
}

impl GadgetAgentConfig {
    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            target: self.multicast_addr.clone(),
            location_header: self.location_header.clone(),
            window_ms: self.discovery_window_ms,
            poll_ms: self.discovery_poll_ms,
            ..DiscoveryConfig::default()
        }
    }

    pub fn device_http_timeout(&self) -> Duration {
        Duration::from_secs(self.device_http_timeout_secs)
    }
}

/// Values taken from `NEOHUB_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub relay_port: Option<u16>,
    pub cloud_url: Option<String>,
    pub hub_id: Option<String>,
    pub settings_path: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            relay_port: env_vars::relay_port(),
            cloud_url: env_vars::cloud_url(),
            hub_id: env_vars::hub_id(),
            settings_path: env_vars::settings_path(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Load from `path`, from `NEOHUB_CONFIG`, or from `neohub.toml` if it
    /// exists; then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: Option<PathBuf> = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(env_vars::CONFIG_PATH).ok().map(PathBuf::from))
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });

        let mut config = match &path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Cannot read {}", path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Cannot load {}", path.display()))?
            }
            None => Self::default(),
        };
        config.source = path;
        config.apply_overrides(EnvOverrides::from_env());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: EnvOverrides) {
        if let Some(port) = overrides.relay_port {
            self.relay.port = port;
        }
        if let Some(url) = overrides.cloud_url {
            self.cloud.url = url;
        }
        if let Some(id) = overrides.hub_id {
            self.hub.id = Some(id);
        }
        if let Some(path) = overrides.settings_path {
            self.hub.settings_path = path;
        }
    }

    /// Configured hub id, or one derived from the local MAC address.
    pub fn hub_id(&self) -> Result<String> {
        match self.hub.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => Ok(id.to_string()),
            None => neohub_core::hub_id::local_hub_id()
                .context("No network interface MAC found; set hub.id or NEOHUB_HUB_ID"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.relay.port, 60110);
        assert_eq!(config.relay.max_clients, 30);
        assert_eq!(config.relay.max_message_len, 8192);
        assert_eq!(config.cloud.poll_timeout_secs, 30);
        assert_eq!(config.hub.settings_path, "neohub-settings.redb");
        assert_eq!(config.agent.periods.registry_capacity, 8);
        assert_eq!(config.agent.periods.loop_sleep_secs, 10);
        assert_eq!(config.agent.device_type, 3);
        assert_eq!(config.agent.discovery().target, "239.255.255.250:1900");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            log_level = "debug"

            [relay]
            port = 7000

            [hub]
            id = "00112233FFFE4455"

            [agent]
            discovery_period_secs = 120
            discovery_window_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.relay.port, 7000);
        assert_eq!(config.relay.bind, "127.0.0.1");
        assert_eq!(config.hub_id().unwrap(), "00112233FFFE4455");
        assert_eq!(config.agent.periods.discovery_period_secs, 120);
        assert_eq!(config.agent.periods.heartbeat_period_secs, 300);
        assert_eq!(config.agent.discovery().window_ms, 1500);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = GatewayConfig::from_toml_str("[relay]\nport = 7000\n").unwrap();
        config.apply_overrides(EnvOverrides {
            relay_port: Some(7100),
            cloud_url: Some("cloud.example/ml".into()),
            ..EnvOverrides::default()
        });
        assert_eq!(config.relay.port, 7100);
        assert_eq!(config.cloud.url, "cloud.example/ml");
        assert_eq!(config.cloud.endpoint(), "http://cloud.example/ml");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cloud]\nuse_ssl = true").unwrap();
        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert!(config.cloud.use_ssl);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\nport = \"not a port\"").unwrap();
        assert!(GatewayConfig::load(Some(file.path())).is_err());
    }
}
