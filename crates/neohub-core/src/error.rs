//! Error types shared by every NeoHub crate.

use thiserror::Error;

/// Result type for NeoHub operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy.
///
/// Transport and setup failures abort the operation in progress; parse and
/// capacity failures are local to one message or one table and are reported
/// to the caller without side effects.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Socket, connect or channel failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Structurally malformed inbound message.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A bounded table has no free slot.
    #[error("Capacity exhausted: {0}")]
    Capacity(String),

    /// Lookup miss where the caller required a hit.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persistence provider failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether the error came from a bounded table being full.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Error::Capacity(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
