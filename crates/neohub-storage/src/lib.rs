//! Persistence for the NeoHub gateway.
//!
//! Only the hub's small set of named settings is persisted; device state
//! is rebuilt by discovery after every start.

pub mod error;
pub mod settings;

pub use error::{Error, Result};
pub use settings::{keys, HubSettings, MemorySettings, RedbSettings, SettingsStore};
