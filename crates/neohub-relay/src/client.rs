//! Relay client for agents running outside the relay process.
//!
//! The client keeps one framed connection to the local relay, reconnecting
//! after a fixed delay whenever it drops. Outbound payloads are queued and
//! written in order; every inbound frame is handed to the raw listeners,
//! usually a command parser.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use neohub_core::config::relay as defaults;
use neohub_core::{Error, MessageSink, RawListeners, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::framing;

/// Relay client settings.
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    pub address: String,
    pub max_message_len: usize,
    pub reconnect_delay: Duration,
    pub queue_depth: usize,
}

impl RelayClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_message_len: defaults::MAX_MESSAGE_LEN,
            reconnect_delay: Duration::from_secs(defaults::RECONNECT_DELAY_SECS),
            queue_depth: defaults::OUTBOUND_QUEUE_DEPTH,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Sending side of a running relay client.
#[derive(Clone)]
pub struct RelayClient {
    outbound: mpsc::Sender<Bytes>,
}

impl RelayClient {
    /// Spawn the connection loop and return a handle to it.
    pub fn spawn(
        config: RelayClientConfig,
        inbound: Arc<RawListeners>,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound, rx) = mpsc::channel(config.queue_depth.max(1));
        tokio::spawn(connection_loop(config, rx, inbound, cancel));
        Self { outbound }
    }
}

impl MessageSink for RelayClient {
    fn submit(&self, payload: Bytes) -> Result<()> {
        self.outbound
            .try_send(payload)
            .map_err(|e| Error::Transport(format!("relay queue: {}", e)))
    }
}

async fn connection_loop(
    config: RelayClientConfig,
    mut outbound: mpsc::Receiver<Bytes>,
    inbound: Arc<RawListeners>,
    cancel: CancellationToken,
) {
    loop {
        match TcpStream::connect(&config.address).await {
            Ok(stream) => {
                info!(category = "relay", address = %config.address, "Connected to relay");
                let done = relay_session(stream, &config, &mut outbound, &inbound, &cancel).await;
                if done {
                    break;
                }
                warn!(category = "relay", address = %config.address, "Relay connection lost");
            }
            Err(e) => {
                debug!(address = %config.address, error = %e, "Relay not reachable");
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
    info!(category = "relay", "Relay client stopped");
}

/// Pump one connection. Returns `true` when the client should stop for good.
async fn relay_session(
    stream: TcpStream,
    config: &RelayClientConfig,
    outbound: &mut mpsc::Receiver<Bytes>,
    inbound: &RawListeners,
    cancel: &CancellationToken,
) -> bool {
    let mut framed = framing::framed(stream, config.max_message_len);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return true,
            payload = outbound.recv() => {
                let Some(payload) = payload else { return true };
                if let Err(e) = framed.send(payload).await {
                    warn!(category = "relay", error = %e, "Relay write failed");
                    return false;
                }
            }
            frame = framed.next() => match frame {
                Some(Ok(frame)) => {
                    inbound.broadcast(&frame);
                }
                Some(Err(e)) => {
                    warn!(category = "relay", error = %e, "Relay read failed");
                    return false;
                }
                None => return false,
            },
        }
    }
}
