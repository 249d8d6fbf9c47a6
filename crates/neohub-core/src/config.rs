//! Shared configuration defaults.
//!
//! Every crate takes its defaults from here so that the relay, the agents
//! and the CLI agree on ports, periods and table sizes.

/// Local relay defaults.
pub mod relay {
    /// Default loopback address the relay listens on.
    pub const DEFAULT_BIND: &str = "127.0.0.1";
    /// Default TCP port of the local relay.
    pub const DEFAULT_PORT: u16 = 60110;
    /// Maximum simultaneously connected local clients.
    pub const MAX_CLIENTS: usize = 30;
    /// Maximum size of one framed message, in bytes.
    pub const MAX_MESSAGE_LEN: usize = 8192;
    /// Depth of the outbound cloud queue.
    pub const OUTBOUND_QUEUE_DEPTH: usize = 64;
    /// Per-client pending frame limit before the client is dropped.
    pub const CLIENT_QUEUE_DEPTH: usize = 32;
    /// Delay between reconnect attempts of out-of-process agents.
    pub const RECONNECT_DELAY_SECS: u64 = 5;
}

/// Cloud endpoint defaults.
pub mod cloud {
    pub const DEFAULT_URL: &str = "developer.peoplepowerco.com:8080/deviceio/ml";
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;
    pub const TRANSFER_TIMEOUT_SECS: u64 = 60;
    pub const POLL_TIMEOUT_SECS: u64 = 30;
    /// Back-off after a failed cloud exchange.
    pub const RETRY_DELAY_SECS: u64 = 5;
}

/// Hub (proxy) defaults.
pub mod hub {
    pub const DEFAULT_DEVICE_TYPE: &str = "4";
    pub const DEFAULT_UPLOAD_INTERVAL_SECS: u64 = 60;
    pub const DEFAULT_SETTINGS_PATH: &str = "neohub-settings.redb";
    /// Interfaces probed for a MAC address, in preference order.
    pub const MAC_INTERFACES: &[&str] = &["eth0", "eth1", "wlan0", "br0"];
}

/// Device agent defaults.
pub mod agent {
    pub const REGISTRY_CAPACITY: usize = 8;
    pub const DEATH_PERIOD_SECS: u64 = 300;
    pub const DISCOVERY_PERIOD_SECS: u64 = 60;
    pub const HEARTBEAT_PERIOD_SECS: u64 = 300;
    pub const MEASUREMENT_PERIOD_SECS: u64 = 60;
    pub const LOOP_SLEEP_SECS: u64 = 10;
    pub const DEVICE_TYPE: u32 = 3;
    pub const DEVICE_HTTP_TIMEOUT_SECS: u64 = 3;
    /// Worst-case size of one telemetry message built by an agent.
    pub const MAX_MSG_SIZE: usize = 4096;
}

/// Discovery defaults.
pub mod discovery {
    pub const MULTICAST_ADDR: &str = "239.255.255.250:1900";
    pub const MULTICAST_TTL: u32 = 3;
    pub const LOCATION_HEADER: &str = "LOCATION";
    pub const WINDOW_MS: u64 = 3000;
    pub const POLL_MS: u64 = 500;
    pub const MAX_REPLY_LEN: usize = 2048;
}

/// Protocol table sizes.
pub mod protocol {
    /// Capacity of the command listener table.
    pub const TOTAL_COMMAND_LISTENERS: usize = 10;
    /// Capacity of the raw message listener table.
    pub const TOTAL_RAW_LISTENERS: usize = 10;
    /// Leading characters of `command_type` compared by listener prefixes.
    pub const TYPE_CHARS_TO_MATCH: usize = 3;
    /// Token whose presence marks a batch sent while a user is watching.
    pub const USER_WATCHING_MARKER: &str = "CONT";
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG_PATH: &str = "NEOHUB_CONFIG";
    pub const LOG_JSON: &str = "NEOHUB_LOG_JSON";
    pub const RELAY_PORT: &str = "NEOHUB_RELAY_PORT";
    pub const CLOUD_URL: &str = "NEOHUB_CLOUD_URL";
    pub const HUB_ID: &str = "NEOHUB_HUB_ID";
    pub const SETTINGS_PATH: &str = "NEOHUB_SETTINGS_PATH";

    /// Relay port from the environment, if set and valid.
    pub fn relay_port() -> Option<u16> {
        std::env::var(RELAY_PORT).ok().and_then(|s| s.parse().ok())
    }

    /// Cloud URL from the environment, if set and non-empty.
    pub fn cloud_url() -> Option<String> {
        std::env::var(CLOUD_URL).ok().filter(|s| !s.is_empty())
    }

    /// Hub id override from the environment.
    pub fn hub_id() -> Option<String> {
        std::env::var(HUB_ID).ok().filter(|s| !s.is_empty())
    }

    /// Settings database path from the environment.
    pub fn settings_path() -> Option<String> {
        std::env::var(SETTINGS_PATH).ok().filter(|s| !s.is_empty())
    }

    /// Whether JSON log output was requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// Normalize a cloud URL by adding a scheme when it has none.
///
/// `https://` is used only when SSL is enabled and the certificate exists.
pub fn normalize_cloud_url(url: &str, use_ssl: bool, certificate_present: bool) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    if use_ssl && certificate_present {
        format!("https://{}", url)
    } else {
        format!("http://{}", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cloud_url() {
        assert_eq!(
            normalize_cloud_url("example.com/ml", false, false),
            "http://example.com/ml"
        );
        assert_eq!(
            normalize_cloud_url("example.com/ml", true, true),
            "https://example.com/ml"
        );
        // ssl without a certificate falls back to plain http
        assert_eq!(
            normalize_cloud_url("example.com/ml", true, false),
            "http://example.com/ml"
        );
        assert_eq!(
            normalize_cloud_url("https://example.com", false, false),
            "https://example.com"
        );
    }
}
