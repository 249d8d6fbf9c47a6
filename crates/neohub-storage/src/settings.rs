//! Named string settings that survive restarts.
//!
//! The hub keeps a handful of values here (device type, reboot counter,
//! upload interval). Access is best-effort: a read failure looks like a
//! missing key and falls back to the documented default, a write failure
//! is logged by the caller and the in-memory value stays authoritative.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use neohub_core::config::hub::{DEFAULT_DEVICE_TYPE, DEFAULT_UPLOAD_INTERVAL_SECS};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use crate::error::Result;

/// Setting keys.
pub mod keys {
    pub const DEVICE_TYPE: &str = "PROXY_DEVICE_TYPE";
    pub const REBOOTS: &str = "PROXY_REBOOTS";
    pub const UPLOAD_INTERVAL: &str = "PROXY_UPLOAD_INTERVAL";
}

const SETTINGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Persistence provider for named string settings.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Settings stored in a redb database file.
pub struct RedbSettings {
    db: Arc<Database>,
}

impl RedbSettings {
    /// Open or create the settings database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = if path.exists() {
            Database::open(path)?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Database::create(path)?
        };
        debug!(path = %path.display(), "Opened settings database");
        Ok(Self { db: Arc::new(db) })
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(SETTINGS_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }
}

impl SettingsStore for RedbSettings {
    fn get(&self, key: &str) -> Option<String> {
        match self.read(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read setting");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS_TABLE)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }
}

/// Settings kept in memory only.
#[derive(Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Typed view over the hub's settings with their defaults applied.
#[derive(Clone)]
pub struct HubSettings {
    store: Arc<dyn SettingsStore>,
}

impl HubSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Device type the hub reports for itself.
    pub fn device_type(&self) -> String {
        self.store
            .get(keys::DEVICE_TYPE)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE_TYPE.to_string())
    }

    pub fn set_device_type(&self, device_type: &str) -> Result<()> {
        self.store.set(keys::DEVICE_TYPE, device_type)
    }

    pub fn reboots(&self) -> u64 {
        self.store
            .get(keys::REBOOTS)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Count one more start of the hub and return the new total.
    ///
    /// The new count is returned even if it could not be persisted.
    pub fn record_reboot(&self) -> u64 {
        let reboots = self.reboots().saturating_add(1);
        if let Err(e) = self.store.set(keys::REBOOTS, &reboots.to_string()) {
            warn!(error = %e, "Failed to persist reboot counter");
        }
        reboots
    }

    /// Upload interval; a missing or zero value reads as the default.
    pub fn upload_interval(&self) -> Duration {
        let secs = self
            .store
            .get(keys::UPLOAD_INTERVAL)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .unwrap_or(DEFAULT_UPLOAD_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    /// Persist a new upload interval. Zero is ignored.
    pub fn set_upload_interval(&self, interval: Duration) -> Result<()> {
        let secs = interval.as_secs();
        if secs == 0 {
            return Ok(());
        }
        self.store.set(keys::UPLOAD_INTERVAL, &secs.to_string())
    }
}
