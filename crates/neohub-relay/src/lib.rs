//! Local relay for the NeoHub gateway.
//!
//! One process owns the cloud connection and multiplexes it across local
//! agents connected over framed TCP. This crate provides:
//! - [`RelayServer`], the accept loop and per-client tasks
//! - [`CloudOwner`] and the [`CloudLink`] trait with its HTTP implementation
//! - [`RelayClient`] for agents running in another process
//! - [`HubAgent`], which reports the hub itself

pub mod client;
pub mod clients;
pub mod cloud;
pub mod framing;
pub mod hub;
pub mod server;

pub use client::{RelayClient, RelayClientConfig};
pub use clients::{ClientId, ClientTable};
pub use cloud::{CloudConfig, CloudLink, CloudOwner, HttpCloudLink};
pub use hub::HubAgent;
pub use server::{RelayConfig, RelayHandle, RelayServer};
