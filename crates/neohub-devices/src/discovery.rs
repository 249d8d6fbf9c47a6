//! Multicast discovery.
//!
//! One pass sends a single probe datagram to the discovery group, then
//! collects unicast replies for a fixed window. Each reply is scanned for
//! the location header; the host part of its URI is a candidate address.
//! Every candidate is handed to the family's `capture_details`; confirmed
//! devices are added to (or refreshed in) the registry, the rest are
//! dropped silently.
//!
//! Socket setup failures abort the pass. Nothing is retried here: the
//! agent runs discovery again on its own schedule.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use neohub_core::config::discovery as defaults;

use crate::device::DeviceInfo;
use crate::family::DeviceFamily;
use crate::registry::{AddOutcome, DeviceRegistry};

/// Candidates whose details are captured at the same time.
const CAPTURE_CONCURRENCY: usize = 4;

/// Discovery setup errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("Multicast error: {0}")]
    Multicast(String),

    #[error("Invalid target address: {0}")]
    InvalidTarget(String),
}

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Where the probe is sent; usually the SSDP multicast group.
    #[serde(default = "default_target")]
    pub target: String,
    /// Reply header carrying the device base URI (matched case-insensitively).
    #[serde(default = "default_location_header")]
    pub location_header: String,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

fn default_target() -> String {
    defaults::MULTICAST_ADDR.to_string()
}

fn default_location_header() -> String {
    defaults::LOCATION_HEADER.to_string()
}

fn default_window_ms() -> u64 {
    defaults::WINDOW_MS
}

fn default_poll_ms() -> u64 {
    defaults::POLL_MS
}

fn default_ttl() -> u32 {
    defaults::MULTICAST_TTL
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            location_header: default_location_header(),
            window_ms: default_window_ms(),
            poll_ms: default_poll_ms(),
            ttl: default_ttl(),
        }
    }
}

impl DiscoveryConfig {
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_window(mut self, window: Duration, poll: Duration) -> Self {
        self.window_ms = window.as_millis() as u64;
        self.poll_ms = poll.as_millis() as u64;
        self
    }
}

/// What one discovery pass found.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// Distinct addresses that answered the probe.
    pub candidates: Vec<String>,
    /// Devices confirmed by the family adapter.
    pub confirmed: Vec<DeviceInfo>,
    /// Confirmed devices that were new to the registry.
    pub added: usize,
}

/// Discovery engine for one family.
#[derive(Debug, Clone)]
pub struct Discovery {
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    fn target(&self) -> Result<SocketAddrV4, DiscoveryError> {
        match self.config.target.parse::<SocketAddr>() {
            Ok(SocketAddr::V4(addr)) => Ok(addr),
            _ => Err(DiscoveryError::InvalidTarget(self.config.target.clone())),
        }
    }

    fn open_socket(&self, target: &SocketAddrV4) -> Result<UdpSocket, DiscoveryError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
        if target.ip().is_multicast() {
            socket.set_multicast_ttl_v4(self.config.ttl)?;
            socket
                .join_multicast_v4(target.ip(), &Ipv4Addr::UNSPECIFIED)
                .map_err(|e| DiscoveryError::Multicast(format!("join {}: {}", target.ip(), e)))?;
        }
        socket.set_nonblocking(true)?;
        Ok(UdpSocket::from_std(socket.into())?)
    }

    /// Send `probe` and collect the distinct hosts that answer within the window.
    pub async fn probe(&self, probe: &[u8]) -> Result<Vec<String>, DiscoveryError> {
        let target = self.target()?;
        let socket = self.open_socket(&target)?;
        socket.send_to(probe, SocketAddr::V4(target)).await?;
        debug!(target = %target, "Discovery probe sent");

        let poll = Duration::from_millis(self.config.poll_ms.max(1));
        let deadline = Instant::now() + Duration::from_millis(self.config.window_ms);
        let mut buf = vec![0u8; defaults::MAX_REPLY_LEN];
        let mut hosts: Vec<String> = Vec::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = poll.min(deadline - now);
            match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    let reply = String::from_utf8_lossy(&buf[..len]);
                    let Some(host) = extract_location(&reply, &self.config.location_header)
                        .and_then(host_from_uri)
                    else {
                        debug!(from = %from, "Reply without location header");
                        continue;
                    };
                    if !hosts.iter().any(|h| h == host) {
                        debug!(from = %from, host, "Discovery reply");
                        hosts.push(host.to_string());
                    }
                }
                Ok(Err(e)) => debug!(error = %e, "Discovery receive failed"),
                Err(_) => {}
            }
        }

        if target.ip().is_multicast() {
            if let Err(e) = socket.leave_multicast_v4(*target.ip(), Ipv4Addr::UNSPECIFIED) {
                debug!(error = %e, "Failed to leave multicast group");
            }
        }
        Ok(hosts)
    }

    /// Run one full discovery pass for `family` into `registry`.
    pub async fn run<F: DeviceFamily>(
        &self,
        family: &F,
        registry: &mut DeviceRegistry<F::Payload>,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let candidates = self.probe(&family.probe()).await?;
        let mut report = DiscoveryReport {
            candidates: candidates.clone(),
            ..DiscoveryReport::default()
        };

        // capture concurrently, but apply to the registry in reply order
        let captures: Vec<_> = stream::iter(candidates)
            .map(|ip| async move {
                let result = family.capture_details(&ip).await;
                (ip, result)
            })
            .buffered(CAPTURE_CONCURRENCY)
            .collect()
            .await;

        for (ip, result) in captures {
            let device = match result {
                Ok(Some(device)) => device,
                Ok(None) => {
                    debug!(family = family.name(), ip = %ip, "Not a device of this family");
                    continue;
                }
                Err(e) => {
                    debug!(family = family.name(), ip = %ip, error = %e, "Capture failed");
                    continue;
                }
            };
            report.confirmed.push(device.info());

            if registry.refresh(&device, Instant::now()) {
                continue;
            }
            match registry.add(device) {
                Ok(AddOutcome::Added(_)) => report.added += 1,
                Ok(AddOutcome::Duplicate) => {}
                Err(e) => warn!(family = family.name(), ip = %ip, error = %e, "Cannot track device"),
            }
        }

        info!(
            category = "discovery",
            family = family.name(),
            candidates = report.candidates.len(),
            confirmed = report.confirmed.len(),
            added = report.added,
            "Discovery pass complete"
        );
        Ok(report)
    }
}

/// Value of the first `header` line in `reply` (case-insensitive name).
pub fn extract_location<'a>(reply: &'a str, header: &str) -> Option<&'a str> {
    reply.split(['\r', '\n']).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case(header)
            .then(|| value.trim())
            .filter(|v| !v.is_empty())
    })
}

/// Host part of a base URI: the text between `://` and the next `/`, or
/// the rest of the string if no `/` follows.
pub fn host_from_uri(uri: &str) -> Option<&str> {
    let (_, rest) = uri.split_once("://")?;
    let host = rest.split('/').next().unwrap_or(rest);
    (!host.is_empty()).then_some(host)
}
