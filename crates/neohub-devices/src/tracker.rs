//! Duplicate command suppression.
//!
//! The transport may deliver the same command more than once. Each device
//! remembers the highest command id it executed; a command whose id is not
//! strictly greater is a redelivery. Id `0` (and the unsequenced negative
//! ids) are control values and always pass.
//!
//! Every param of one command shares its id, so while a batch is open the
//! current id stays admissible for params not seen yet. The batch closes at
//! the sentinel; after that the id only counts as a redelivery.

use std::collections::{HashMap, HashSet};

/// Command currently being applied to one device.
#[derive(Debug)]
struct OpenCommand {
    id: i64,
    params: HashSet<(String, Option<char>)>,
}

/// Highest executed command id per device.
#[derive(Debug, Default)]
pub struct CommandTracker {
    last_executed: HashMap<String, i64>,
    open: HashMap<String, OpenCommand>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the param `(name, index)` of `command_id` should run on
    /// `device_id`; records it if so.
    pub fn admit(&mut self, device_id: &str, command_id: i64, name: &str, index: Option<char>) -> bool {
        if command_id <= 0 {
            return true;
        }
        if let Some(open) = self.open.get_mut(device_id) {
            if open.id == command_id {
                return open.params.insert((name.to_string(), index));
            }
        }
        if matches!(self.last_executed.get(device_id), Some(&last) if command_id <= last) {
            return false;
        }
        self.last_executed.insert(device_id.to_string(), command_id);
        self.open.insert(
            device_id.to_string(),
            OpenCommand {
                id: command_id,
                params: HashSet::from([(name.to_string(), index)]),
            },
        );
        true
    }

    /// Close the current batch; its ids are redeliveries from now on.
    pub fn end_batch(&mut self) {
        self.open.clear();
    }

    pub fn last_executed(&self, device_id: &str) -> Option<i64> {
        self.last_executed.get(device_id).copied()
    }

    /// Drop the history of a device that left the registry.
    pub fn forget(&mut self, device_id: &str) {
        self.last_executed.remove(device_id);
        self.open.remove(device_id);
    }
}
