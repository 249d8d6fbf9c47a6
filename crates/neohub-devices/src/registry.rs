//! Fixed-capacity device registry.
//!
//! The registry is an array of slots sized once at construction. A slot is
//! either empty or holds one complete [`Device`]; in-use slots never share
//! an `ip` or a `uuid`. The owner (the device agent) serializes all access,
//! so the registry itself takes `&mut self` and has no internal locking.
//!
//! Interested parties subscribe to [`RegistryEvent`]s to learn about added
//! and evicted devices.

use std::time::Duration;

use neohub_core::{Error, Result};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::info;

use crate::device::Device;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Change notification emitted by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A device claimed a free slot.
    Added { uuid: String, ip: String },
    /// A device missed its liveness deadline and its slot was cleared.
    Gone { uuid: String, ip: String },
}

/// Result of [`DeviceRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored in the given slot.
    Added(usize),
    /// Already tracked; the existing entry was left untouched.
    Duplicate,
}

/// Slot table of managed devices.
pub struct DeviceRegistry<P> {
    slots: Box<[Option<Device<P>>]>,
    events: broadcast::Sender<RegistryEvent>,
}

impl<P> DeviceRegistry<P> {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Store `device` in the first free slot.
    ///
    /// A device whose `ip` (or non-empty `uuid`) is already tracked is a
    /// duplicate and leaves the registry unchanged. Fails with
    /// [`Error::Capacity`] when every slot is in use, and with
    /// [`Error::Parse`] for a device without an address.
    pub fn add(&mut self, device: Device<P>) -> Result<AddOutcome> {
        if device.ip.trim().is_empty() {
            return Err(Error::Parse(format!(
                "device {:?} has no ip address",
                device.uuid
            )));
        }
        if self.get_by_ip(&device.ip).is_some()
            || (!device.uuid.is_empty() && self.get_by_uuid(&device.uuid).is_some())
        {
            return Ok(AddOutcome::Duplicate);
        }

        let capacity = self.slots.len();
        let Some((index, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
        else {
            return Err(Error::Capacity(format!(
                "device registry is full ({} slots)",
                capacity
            )));
        };

        info!(uuid = %device.uuid, ip = %device.ip, slot = index, "Device added");
        let event = RegistryEvent::Added {
            uuid: device.uuid.clone(),
            ip: device.ip.clone(),
        };
        *slot = Some(device);
        let _ = self.events.send(event);
        Ok(AddOutcome::Added(index))
    }

    /// Rewrite the tracked device with the same `uuid` from a fresh capture.
    ///
    /// Address, model and firmware are replaced and the device is touched;
    /// the payload is kept. Returns `false` if no such device is tracked.
    pub fn refresh(&mut self, device: &Device<P>, now: Instant) -> bool {
        if device.uuid.is_empty() {
            return false;
        }
        let clash = self
            .iter()
            .any(|d| d.ip == device.ip && d.uuid != device.uuid);
        let Some(existing) = self.get_by_uuid_mut(&device.uuid) else {
            return false;
        };
        if !clash {
            existing.ip = device.ip.clone();
        }
        existing.model = device.model.clone();
        existing.firmware_version = device.firmware_version.clone();
        existing.touch(now);
        true
    }

    pub fn get_by_ip(&self, ip: &str) -> Option<&Device<P>> {
        self.iter().find(|d| d.ip == ip)
    }

    pub fn get_by_ip_mut(&mut self, ip: &str) -> Option<&mut Device<P>> {
        self.iter_mut().find(|d| d.ip == ip)
    }

    pub fn get_by_uuid(&self, uuid: &str) -> Option<&Device<P>> {
        self.iter().find(|d| d.uuid == uuid)
    }

    pub fn get_by_uuid_mut(&mut self, uuid: &str) -> Option<&mut Device<P>> {
        self.iter_mut().find(|d| d.uuid == uuid)
    }

    /// Device in slot `index`, or `None` if the slot is empty or out of range.
    pub fn get(&self, index: usize) -> Option<&Device<P>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Device<P>> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Fixed number of slots, in use or not.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in use.
    pub fn occupied(&self) -> usize {
        self.iter().count()
    }

    /// In-use devices in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Device<P>> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device<P>> {
        self.slots.iter_mut().flatten()
    }

    /// Evict every device not touched within `timeout` of `now`.
    ///
    /// Emits one [`RegistryEvent::Gone`] per eviction and returns the
    /// evicted devices.
    pub fn garbage_collect(&mut self, now: Instant, timeout: Duration) -> Vec<Device<P>> {
        let mut evicted = Vec::new();
        for slot in self.slots.iter_mut() {
            let expired = slot
                .as_ref()
                .is_some_and(|d| now.saturating_duration_since(d.last_touch) >= timeout);
            if !expired {
                continue;
            }
            if let Some(device) = slot.take() {
                info!(uuid = %device.uuid, ip = %device.ip, "Device gone");
                let _ = self.events.send(RegistryEvent::Gone {
                    uuid: device.uuid.clone(),
                    ip: device.ip.clone(),
                });
                evicted.push(device);
            }
        }
        evicted
    }
}
