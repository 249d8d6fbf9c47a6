//! Bounded table of connected local clients.
//!
//! Each client is represented by the sending half of its writer queue.
//! Delivery never blocks: a client whose queue is full or whose writer has
//! gone away is dropped from the table, which in turn closes its writer.
//! A payload longer than the frame limit cannot be written to anyone, so it
//! is skipped and every client stays connected.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use neohub_core::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identity of one registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct ClientSlot {
    id: ClientId,
    tx: mpsc::Sender<Bytes>,
}

/// Fixed-capacity client table.
pub struct ClientTable {
    slots: Mutex<Box<[Option<ClientSlot>]>>,
    next_id: AtomicU64,
    max_message_len: usize,
}

impl ClientTable {
    pub fn new(capacity: usize, max_message_len: usize) -> Self {
        Self {
            slots: Mutex::new(std::iter::repeat_with(|| None).take(capacity).collect()),
            next_id: AtomicU64::new(1),
            max_message_len,
        }
    }

    /// Register a client writer queue. Fails when every slot is taken.
    pub fn register(&self, tx: mpsc::Sender<Bytes>) -> Result<ClientId> {
        let mut slots = self.slots.lock();
        let capacity = slots.len();
        let Some(slot) = slots.iter_mut().find(|s| s.is_none()) else {
            return Err(Error::Capacity(format!(
                "client table is full ({} slots)",
                capacity
            )));
        };
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        *slot = Some(ClientSlot { id, tx });
        Ok(id)
    }

    /// Remove a client. Returns `false` if it was not registered.
    pub fn deregister(&self, id: ClientId) -> bool {
        let mut slots = self.slots.lock();
        match slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|c| c.id == id))
        {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.slots
            .lock()
            .iter()
            .flatten()
            .any(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Queue `payload` for every client except `except`.
    ///
    /// Returns the number of clients it was queued for. Clients that cannot
    /// take it are removed.
    pub fn broadcast(&self, payload: &Bytes, except: Option<ClientId>) -> usize {
        if payload.len() > self.max_message_len {
            warn!(
                len = payload.len(),
                max = self.max_message_len,
                "Message too long for local clients, not relayed"
            );
            return 0;
        }
        let mut delivered = 0;
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            let Some(client) = slot.as_ref() else {
                continue;
            };
            if Some(client.id) == except {
                continue;
            }
            match client.tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = %client.id, "Client queue full, dropping client");
                    *slot = None;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client = %client.id, "Client writer gone");
                    *slot = None;
                }
            }
        }
        delivered
    }
}
