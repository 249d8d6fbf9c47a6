//! Hub-to-server envelope.
//!
//! Every outbound payload is wrapped exactly once, right before it leaves
//! for the cloud, with the hub identity and a sequence number that only
//! moves forward for the lifetime of the process.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8" ?>"#;
const ENVELOPE_VERSION: u32 = 2;
const FOOTER: &str = "</h2s>";

/// Wraps payloads with the hub header and footer.
#[derive(Debug)]
pub struct Envelope {
    hub_id: String,
    seq: AtomicU32,
}

impl Envelope {
    pub fn new(hub_id: impl Into<String>) -> Self {
        Self {
            hub_id: hub_id.into(),
            seq: AtomicU32::new(0),
        }
    }

    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    /// Sequence number used by the most recent wrap (0 before the first one).
    pub fn last_seq(&self) -> u32 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Wrap `payload`, taking the next sequence number.
    pub fn wrap(&self, payload: &[u8]) -> Bytes {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let header = format!(
            r#"{XML_DECLARATION}<h2s ver="{ENVELOPE_VERSION}" hubId="{}" seq="{seq}">"#,
            self.hub_id
        );
        let mut out = BytesMut::with_capacity(header.len() + payload.len() + FOOTER.len());
        out.put_slice(header.as_bytes());
        out.put_slice(payload);
        out.put_slice(FOOTER.as_bytes());
        out.freeze()
    }
}
