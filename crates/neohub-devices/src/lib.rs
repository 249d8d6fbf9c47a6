//! Device management for the NeoHub gateway.
//!
//! This crate provides:
//! - [`Device`] and the fixed-capacity [`DeviceRegistry`]
//! - Multicast [`Discovery`] feeding the registry
//! - The [`DeviceFamily`] adapter trait and the generic HTTP gadget family
//! - The periodic [`DeviceAgent`] tying them to the command and telemetry paths

pub mod agent;
pub mod device;
pub mod discovery;
pub mod family;
pub mod gadget;
pub mod registry;
pub mod tracker;

pub use agent::{AgentConfig, DeviceAgent, PassReport};
pub use device::{Device, DeviceInfo};
pub use discovery::{Discovery, DiscoveryConfig, DiscoveryError, DiscoveryReport};
pub use family::{AdapterError, AdapterResult, DeviceFamily};
pub use gadget::{GadgetReadings, HttpGadgetFamily};
pub use registry::{AddOutcome, DeviceRegistry, RegistryEvent};
pub use tracker::CommandTracker;
