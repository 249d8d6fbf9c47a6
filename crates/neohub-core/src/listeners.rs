//! Bounded listener tables for parsed commands and raw inbound messages.
//!
//! Both tables are fixed-size slot arrays. Adding a listener that is already
//! registered is a successful no-op, removing one that is not registered
//! reports `false`, and a full table rejects new listeners with
//! [`Error::Capacity`]. Listener identity is the address of the shared
//! allocation, so the same `Arc` (or a clone of it) counts as one listener.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::Command;
use crate::config::protocol::{TOTAL_COMMAND_LISTENERS, TOTAL_RAW_LISTENERS, TYPE_CHARS_TO_MATCH};
use crate::error::{Error, Result};

/// Subscriber for dispatched commands.
pub trait CommandListener: Send + Sync {
    fn on_command(&self, command: &Command<'_>);
}

impl<F> CommandListener for F
where
    F: Fn(&Command<'_>) + Send + Sync,
{
    fn on_command(&self, command: &Command<'_>) {
        self(command)
    }
}

/// Subscriber for full, unparsed inbound messages.
pub trait RawListener: Send + Sync {
    fn on_message(&self, message: &[u8]);
}

impl<F> RawListener for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn on_message(&self, message: &[u8]) {
        self(message)
    }
}

struct Registration<L: ?Sized, K> {
    key: K,
    listener: Arc<L>,
}

/// Fixed-capacity listener table. Never grows past `N` entries.
pub struct ListenerTable<L: ?Sized, K, const N: usize> {
    slots: [Option<Registration<L, K>>; N],
}

impl<L: ?Sized, K, const N: usize> Default for ListenerTable<L, K, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized, K, const N: usize> ListenerTable<L, K, N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Register `listener` under `key` in the first free slot.
    pub fn add(&mut self, key: K, listener: Arc<L>) -> Result<()> {
        if self.contains(&listener) {
            return Ok(());
        }
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(Registration { key, listener });
                Ok(())
            }
            None => Err(Error::Capacity(format!("listener table is full ({} slots)", N))),
        }
    }

    /// Unregister `listener`. Returns `false` when it was not registered.
    pub fn remove(&mut self, listener: &Arc<L>) -> bool {
        for slot in self.slots.iter_mut() {
            if slot
                .as_ref()
                .is_some_and(|r| same_listener(&r.listener, listener))
            {
                *slot = None;
                return true;
            }
        }
        false
    }

    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|r| same_listener(&r.listener, listener))
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Listeners whose key satisfies `pred`, in slot order.
    pub fn matching(&self, mut pred: impl FnMut(&K) -> bool) -> Vec<Arc<L>> {
        self.slots
            .iter()
            .flatten()
            .filter(|r| pred(&r.key))
            .map(|r| Arc::clone(&r.listener))
            .collect()
    }
}

fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Truncate a registered type prefix to the compared length.
fn stored_prefix(type_prefix: &str) -> String {
    type_prefix.chars().take(TYPE_CHARS_TO_MATCH).collect()
}

/// Whether a registered prefix selects `command_type`.
///
/// Only the first [`TYPE_CHARS_TO_MATCH`] characters take part, so `"set"`
/// also selects `"set2"` and `"settings"`. An empty prefix selects everything.
pub fn prefix_matches(type_prefix: &str, command_type: &str) -> bool {
    let mut expected = type_prefix.chars().take(TYPE_CHARS_TO_MATCH);
    let mut actual = command_type.chars();
    expected.all(|c| actual.next() == Some(c))
}

/// Process-wide command listener registry.
pub struct CommandListeners {
    table: Mutex<ListenerTable<dyn CommandListener, String, TOTAL_COMMAND_LISTENERS>>,
}

impl Default for CommandListeners {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandListeners {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(ListenerTable::new()),
        }
    }

    /// Subscribe `listener` to commands whose type starts with `type_prefix`.
    pub fn add(&self, type_prefix: &str, listener: Arc<dyn CommandListener>) -> Result<()> {
        self.table.lock().add(stored_prefix(type_prefix), listener)
    }

    pub fn remove(&self, listener: &Arc<dyn CommandListener>) -> bool {
        self.table.lock().remove(listener)
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `command` to every matching listener, in registration order.
    ///
    /// Returns the number of listeners invoked. The table lock is released
    /// before the callbacks run.
    pub fn broadcast(&self, command: &Command<'_>) -> usize {
        let targets = self
            .table
            .lock()
            .matching(|prefix| prefix_matches(prefix, &command.command_type));
        for listener in &targets {
            listener.on_command(command);
        }
        targets.len()
    }
}

/// Process-wide raw message listener registry.
pub struct RawListeners {
    table: Mutex<ListenerTable<dyn RawListener, (), TOTAL_RAW_LISTENERS>>,
}

impl Default for RawListeners {
    fn default() -> Self {
        Self::new()
    }
}

impl RawListeners {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(ListenerTable::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn RawListener>) -> Result<()> {
        self.table.lock().add((), listener)
    }

    pub fn remove(&self, listener: &Arc<dyn RawListener>) -> bool {
        self.table.lock().remove(listener)
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `message` to every registered listener. Empty messages are dropped.
    pub fn broadcast(&self, message: &[u8]) -> usize {
        if message.is_empty() {
            return 0;
        }
        let targets = self.table.lock().matching(|_| true);
        for listener in &targets {
            listener.on_message(message);
        }
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: Arc<AtomicUsize>) -> Arc<dyn CommandListener> {
        Arc::new(move |_: &Command<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn command(command_type: &str) -> Command<'static> {
        Command {
            command_type: command_type.to_string(),
            ..Command::default()
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let listeners = CommandListeners::new();
        let listener = counting_listener(Arc::new(AtomicUsize::new(0)));

        listeners.add("set", listener.clone()).unwrap();
        listeners.add("set", listener.clone()).unwrap();
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_remove_unregistered_returns_false() {
        let listeners = CommandListeners::new();
        let listener = counting_listener(Arc::new(AtomicUsize::new(0)));

        assert!(!listeners.remove(&listener));
        listeners.add("set", listener.clone()).unwrap();
        assert!(listeners.remove(&listener));
        assert!(!listeners.remove(&listener));
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_table_full() {
        let listeners = CommandListeners::new();
        for _ in 0..TOTAL_COMMAND_LISTENERS {
            let listener = counting_listener(Arc::new(AtomicUsize::new(0)));
            listeners.add("set", listener).unwrap();
        }
        let extra = counting_listener(Arc::new(AtomicUsize::new(0)));
        let err = listeners.add("set", extra).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(listeners.len(), TOTAL_COMMAND_LISTENERS);
    }

    #[test]
    fn test_prefix_dispatch() {
        let listeners = CommandListeners::new();
        let counter = Arc::new(AtomicUsize::new(0));
        listeners.add("se", counting_listener(counter.clone())).unwrap();

        assert_eq!(listeners.broadcast(&command("set")), 1);
        assert_eq!(listeners.broadcast(&command("set2")), 1);
        assert_eq!(listeners.broadcast(&command("get")), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_prefix_truncated() {
        assert!(prefix_matches("settings", "set"));
        assert!(prefix_matches("set", "setpoint"));
        assert!(!prefix_matches("dis", "set"));
        assert!(prefix_matches("", "anything"));
    }

    #[test]
    fn test_broadcast_agrees_with_prefix_matches() {
        let prefixes = ["se", "set", "settings", "dis", ""];
        let types = ["set", "set2", "se", "s", "get", "discover", ""];
        for prefix in prefixes {
            let listeners = CommandListeners::new();
            listeners
                .add(prefix, counting_listener(Arc::new(AtomicUsize::new(0))))
                .unwrap();
            for command_type in types {
                assert_eq!(
                    listeners.broadcast(&command(command_type)) == 1,
                    prefix_matches(prefix, command_type),
                    "prefix {:?} on type {:?}",
                    prefix,
                    command_type
                );
            }
        }
    }

    #[test]
    fn test_raw_broadcast_skips_empty() {
        let raw = RawListeners::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let listener: Arc<dyn RawListener> = Arc::new(move |_: &[u8]| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        raw.add(listener.clone()).unwrap();
        raw.add(listener).unwrap();

        assert_eq!(raw.broadcast(b""), 0);
        assert_eq!(raw.broadcast(b"<s2h/>"), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
