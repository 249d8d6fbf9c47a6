//! Cloud link and its single owner task.
//!
//! Exactly one task talks to the cloud. Everything else hands it payloads
//! through a bounded queue; the task wraps each one in the envelope, sends
//! it, and routes whatever the cloud answers (piggybacked on a send or
//! returned by the long poll) to the local clients and the raw listeners.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use neohub_core::config::{cloud as defaults, normalize_cloud_url};
use neohub_core::{Envelope, Error, RawListeners, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::ClientTable;

/// Connection to the cloud service.
#[async_trait]
pub trait CloudLink: Send + Sync {
    /// Deliver one wrapped message. Returns inbound bytes the cloud
    /// piggybacked on the reply, if any.
    async fn send(&self, envelope: Bytes) -> Result<Option<Bytes>>;

    /// Wait for inbound bytes. `Ok(None)` means nothing was pending.
    async fn poll(&self) -> Result<Option<Bytes>>;
}

/// Cloud endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub use_ssl: bool,
    /// Certificate file; https is used only when it exists.
    #[serde(default)]
    pub ssl_certificate: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_url() -> String {
    defaults::DEFAULT_URL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    defaults::CONNECT_TIMEOUT_SECS
}

fn default_transfer_timeout_secs() -> u64 {
    defaults::TRANSFER_TIMEOUT_SECS
}

fn default_poll_timeout_secs() -> u64 {
    defaults::POLL_TIMEOUT_SECS
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            use_ssl: false,
            ssl_certificate: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl CloudConfig {
    /// Endpoint URL with its scheme resolved.
    pub fn endpoint(&self) -> String {
        let certificate_present = self
            .ssl_certificate
            .as_deref()
            .is_some_and(|p| Path::new(p).exists());
        normalize_cloud_url(&self.url, self.use_ssl, certificate_present)
    }
}

/// HTTP cloud link: envelopes are POSTed, inbound messages long-polled.
pub struct HttpCloudLink {
    client: Client,
    url: String,
    hub_id: String,
    poll_timeout: Duration,
    transfer_timeout: Duration,
}

impl HttpCloudLink {
    pub fn new(config: &CloudConfig, hub_id: impl Into<String>) -> Self {
        let transfer_timeout = Duration::from_secs(config.transfer_timeout_secs);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(transfer_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: config.endpoint(),
            hub_id: hub_id.into(),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            transfer_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn poll_url(&self) -> String {
        format!(
            "{}?id={}&timeout={}",
            self.url,
            self.hub_id,
            self.poll_timeout.as_secs()
        )
    }

    async fn body(response: reqwest::Response) -> Result<Option<Bytes>> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("cloud returned {}", status)));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok((!body.is_empty()).then_some(body))
    }
}

#[async_trait]
impl CloudLink for HttpCloudLink {
    async fn send(&self, envelope: Bytes) -> Result<Option<Bytes>> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(envelope)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Self::body(response).await
    }

    async fn poll(&self) -> Result<Option<Bytes>> {
        let response = self
            .client
            .get(self.poll_url())
            .timeout(self.poll_timeout + self.transfer_timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Self::body(response).await
    }
}

/// The task that owns the cloud link.
pub struct CloudOwner {
    link: Arc<dyn CloudLink>,
    envelope: Arc<Envelope>,
    clients: Arc<ClientTable>,
    raw: Arc<RawListeners>,
    retry_delay: Duration,
}

impl CloudOwner {
    pub fn new(
        link: Arc<dyn CloudLink>,
        envelope: Arc<Envelope>,
        clients: Arc<ClientTable>,
        raw: Arc<RawListeners>,
    ) -> Self {
        Self {
            link,
            envelope,
            clients,
            raw,
            retry_delay: Duration::from_secs(defaults::RETRY_DELAY_SECS),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Send queued payloads and route inbound bytes until `cancel` fires or
    /// every queue sender is gone.
    pub async fn run(self, mut outbound: mpsc::Receiver<Bytes>, cancel: CancellationToken) {
        info!(category = "relay", hub_id = self.envelope.hub_id(), "Cloud link started");
        let link = self.link.as_ref();
        let mut poll = next_poll(link, None);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                payload = outbound.recv() => {
                    let Some(payload) = payload else { break };
                    let wrapped = self.envelope.wrap(&payload);
                    match link.send(wrapped).await {
                        Ok(reply) => self.route_inbound(reply),
                        Err(e) => warn!(
                            category = "relay",
                            seq = self.envelope.last_seq(),
                            error = %e,
                            "Cloud send failed, message dropped"
                        ),
                    }
                }
                result = &mut poll => {
                    match result {
                        Ok(inbound) => {
                            self.route_inbound(inbound);
                            poll = next_poll(link, None);
                        }
                        Err(e) => {
                            warn!(category = "relay", error = %e, "Cloud poll failed");
                            poll = next_poll(link, Some(self.retry_delay));
                        }
                    }
                }
            }
        }
        info!(category = "relay", "Cloud link stopped");
    }

    fn route_inbound(&self, inbound: Option<Bytes>) {
        let Some(message) = inbound.filter(|m| !m.is_empty()) else {
            return;
        };
        let clients = self.clients.broadcast(&message, None);
        let listeners = self.raw.broadcast(&message);
        debug!(len = message.len(), clients, listeners, "Inbound cloud message");
    }
}

fn next_poll(link: &dyn CloudLink, delay: Option<Duration>) -> BoxFuture<'_, Result<Option<Bytes>>> {
    async move {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        link.poll().await
    }
    .boxed()
}
