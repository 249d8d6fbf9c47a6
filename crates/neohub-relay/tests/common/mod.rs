//! Shared fixtures for relay tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use neohub_core::{Envelope, RawListener, Result};
use neohub_relay::framing::{self, FramedConnection};
use neohub_relay::{CloudLink, RelayConfig, RelayHandle, RelayServer};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const HUB_ID: &str = "0011AAFFFE223344";

/// Cloud that records what it is sent and hands out scripted inbound
/// messages to the poller.
pub struct MemoryCloud {
    pub sent: Mutex<Vec<Bytes>>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
}

impl MemoryCloud {
    pub fn new() -> (Arc<Self>, mpsc::Sender<Bytes>) {
        let (tx, rx) = mpsc::channel(16);
        let cloud = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound: tokio::sync::Mutex::new(rx),
        });
        (cloud, tx)
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl CloudLink for MemoryCloud {
    async fn send(&self, envelope: Bytes) -> Result<Option<Bytes>> {
        self.sent.lock().push(envelope);
        Ok(None)
    }

    async fn poll(&self) -> Result<Option<Bytes>> {
        match self.inbound.lock().await.recv().await {
            Some(message) => Ok(Some(message)),
            None => std::future::pending().await,
        }
    }
}

/// Raw listener that keeps a copy of every message.
#[derive(Default)]
pub struct RawRecorder {
    pub seen: Mutex<Vec<Bytes>>,
}

impl RawListener for RawRecorder {
    fn on_message(&self, message: &[u8]) {
        self.seen.lock().push(Bytes::copy_from_slice(message));
    }
}

pub struct RunningRelay {
    pub addr: SocketAddr,
    pub handle: RelayHandle,
    pub clients: Arc<neohub_relay::ClientTable>,
    pub cloud: Arc<MemoryCloud>,
    pub cloud_inbound: mpsc::Sender<Bytes>,
    pub cancel: CancellationToken,
    pub task: tokio::task::JoinHandle<Result<()>>,
}

/// Bind a relay on an ephemeral port, let `setup` register listeners, and
/// run it.
pub async fn start_relay_with(
    config: RelayConfig,
    setup: impl FnOnce(&RelayServer),
) -> RunningRelay {
    let (cloud, cloud_inbound) = MemoryCloud::new();
    let server = RelayServer::bind(
        config,
        cloud.clone() as Arc<dyn CloudLink>,
        Arc::new(Envelope::new(HUB_ID)),
    )
    .await
    .unwrap();
    setup(&server);

    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let clients = server.clients().clone();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(server.run(cancel.clone()));
    RunningRelay {
        addr,
        handle,
        clients,
        cloud,
        cloud_inbound,
        cancel,
        task,
    }
}

pub async fn start_relay() -> RunningRelay {
    start_relay_with(RelayConfig::default().with_port(0), |_| {}).await
}

pub async fn connect(addr: SocketAddr) -> FramedConnection {
    let stream = TcpStream::connect(addr).await.unwrap();
    framing::framed(stream, 8192)
}

pub async fn send_frame(conn: &mut FramedConnection, payload: &'static [u8]) {
    conn.send(Bytes::from_static(payload)).await.unwrap();
}

/// Next frame, or `None` on close or after a short wait.
pub async fn next_frame(conn: &mut FramedConnection) -> Option<Bytes> {
    match tokio::time::timeout(Duration::from_secs(2), conn.next()).await {
        Ok(Some(Ok(frame))) => Some(frame.freeze()),
        _ => None,
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
