//! Core types for the NeoHub gateway.
//!
//! This crate holds everything the relay and the device agents share: the
//! inbound command protocol, the outbound telemetry format, the listener
//! tables and the hub identity.

pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod hub_id;
pub mod listeners;
pub mod parser;
pub mod telemetry;

pub use command::{Command, CommandEvent, ParamCategory, ResultCode, SENTINEL_COMMAND_ID};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use listeners::{CommandListener, CommandListeners, RawListener, RawListeners};
pub use parser::{CommandParser, ParseSummary};
pub use telemetry::{MessageSink, TelemetryMessage};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::command::{Command, CommandEvent, ParamCategory, ResultCode};
    pub use crate::error::{Error, Result};
    pub use crate::listeners::{CommandListener, CommandListeners, RawListener, RawListeners};
    pub use crate::parser::CommandParser;
    pub use crate::telemetry::{MessageSink, TelemetryMessage};
}
