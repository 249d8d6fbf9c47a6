//! Local relay server.
//!
//! The server binds the local port, starts the cloud owner task, and then
//! accepts local clients. Each client gets its own task pair:
//!
//! - a reader that forwards every frame, in receipt order, to the cloud
//!   queue and fans it out to the other clients;
//! - a writer that drains the client's queue in the client table.
//!
//! A client is dropped on EOF, on a read or write error, on an oversized
//! frame, or when its queue overflows. None of that touches the cloud task
//! or the other clients.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use neohub_core::config::relay as defaults;
use neohub_core::{Envelope, Error, MessageSink, RawListeners, Result};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{ClientId, ClientTable};
use crate::cloud::{CloudLink, CloudOwner};
use crate::framing;

/// Relay listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

fn default_bind() -> String {
    defaults::DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    defaults::DEFAULT_PORT
}

fn default_max_clients() -> usize {
    defaults::MAX_CLIENTS
}

fn default_max_message_len() -> usize {
    defaults::MAX_MESSAGE_LEN
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_clients: default_max_clients(),
            max_message_len: default_max_message_len(),
        }
    }
}

impl RelayConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Address local agents connect to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Submits outbound payloads from inside the relay process.
///
/// Payloads go to the cloud queue and to every connected local client.
#[derive(Clone)]
pub struct RelayHandle {
    outbound: mpsc::Sender<Bytes>,
    clients: Arc<ClientTable>,
}

impl MessageSink for RelayHandle {
    fn submit(&self, payload: Bytes) -> Result<()> {
        self.clients.broadcast(&payload, None);
        self.outbound
            .try_send(payload)
            .map_err(|e| Error::Transport(format!("cloud queue: {}", e)))
    }
}

/// The bound relay, ready to run.
pub struct RelayServer {
    config: RelayConfig,
    listener: TcpListener,
    link: Arc<dyn CloudLink>,
    envelope: Arc<Envelope>,
    clients: Arc<ClientTable>,
    raw: Arc<RawListeners>,
    outbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: mpsc::Receiver<Bytes>,
}

impl RelayServer {
    /// Bind the local port. Failing to bind is fatal to the relay.
    pub async fn bind(
        config: RelayConfig,
        link: Arc<dyn CloudLink>,
        envelope: Arc<Envelope>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.address()).await.map_err(|e| {
            error!(category = "relay", address = %config.address(), error = %e, "Bind failed");
            Error::Io(e)
        })?;
        let (outbound_tx, outbound_rx) = mpsc::channel(defaults::OUTBOUND_QUEUE_DEPTH);
        Ok(Self {
            clients: Arc::new(ClientTable::new(
                config.max_clients,
                framing::max_frame_len(config.max_message_len),
            )),
            raw: Arc::new(RawListeners::new()),
            config,
            listener,
            link,
            envelope,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            outbound: self.outbound_tx.clone(),
            clients: Arc::clone(&self.clients),
        }
    }

    /// Listeners that receive every inbound cloud message.
    pub fn raw_listeners(&self) -> &Arc<RawListeners> {
        &self.raw
    }

    pub fn clients(&self) -> &Arc<ClientTable> {
        &self.clients
    }

    /// Run the cloud task and the accept loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let RelayServer {
            config,
            listener,
            link,
            envelope,
            clients,
            raw,
            outbound_tx,
            outbound_rx,
        } = self;

        let owner = CloudOwner::new(link, envelope, Arc::clone(&clients), raw);
        let cloud = tokio::spawn(owner.run(outbound_rx, cancel.child_token()));

        info!(
            category = "relay",
            address = %listener.local_addr()?,
            max_clients = config.max_clients,
            "Relay listening"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = Connection {
                            clients: Arc::clone(&clients),
                            outbound: outbound_tx.clone(),
                            max_message_len: config.max_message_len,
                        };
                        tokio::spawn(connection.serve(stream, peer, cancel.child_token()));
                    }
                    Err(e) => warn!(category = "relay", error = %e, "Accept failed"),
                },
            }
        }

        drop(outbound_tx);
        let _ = cloud.await;
        info!(category = "relay", "Relay stopped");
        Ok(())
    }
}

struct Connection {
    clients: Arc<ClientTable>,
    outbound: mpsc::Sender<Bytes>,
    max_message_len: usize,
}

impl Connection {
    async fn serve(self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<Bytes>(defaults::CLIENT_QUEUE_DEPTH);
        let id = match self.clients.register(tx) {
            Ok(id) => id,
            Err(e) => {
                warn!(category = "relay", peer = %peer, error = %e, "Rejecting client");
                return;
            }
        };
        info!(category = "relay", client = %id, peer = %peer, "Client connected");

        let (mut sink, mut frames) = framing::framed(stream, self.max_message_len).split();

        let mut writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!(client = %id, error = %e, "Client write failed");
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => self.forward(id, frame.freeze()).await,
                    Some(Err(e)) => {
                        warn!(category = "relay", client = %id, error = %e, "Client read failed");
                        break;
                    }
                    None => break,
                },
                // the writer ends on a write error or when the table drops this client
                _ = &mut writer => break,
            }
        }

        self.clients.deregister(id);
        writer.abort();
        info!(category = "relay", client = %id, "Client disconnected");
    }

    async fn forward(&self, id: ClientId, frame: Bytes) {
        if frame.is_empty() {
            return;
        }
        self.clients.broadcast(&frame, Some(id));
        if self.outbound.send(frame).await.is_err() {
            warn!(category = "relay", client = %id, "Cloud queue closed");
        }
    }
}
