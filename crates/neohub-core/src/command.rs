//! Inbound command events and the per-command result codes.
//!
//! A [`Command`] borrows its argument from the message being parsed and is
//! only valid for the duration of one dispatch. Consumers that need to keep
//! it past the callback convert it with [`Command::to_owned_event`].

use serde::{Deserialize, Serialize};

/// Command id carried by the end-of-batch sentinel and by freshly opened commands.
pub const SENTINEL_COMMAND_ID: i64 = -1;

/// Maximum stored length of `command_type`.
pub const COMMAND_TYPE_MAX_LEN: usize = 10;

/// Maximum stored length of `command_name`.
pub const COMMAND_NAME_MAX_LEN: usize = 16;

/// One dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    pub command_id: i64,
    pub user_is_watching: bool,
    pub no_more_commands: bool,
    pub device_id: String,
    pub command_type: String,
    pub command_name: String,
    pub index: Option<char>,
    pub argument: Option<&'a [u8]>,
}

impl Default for Command<'_> {
    fn default() -> Self {
        Self {
            command_id: SENTINEL_COMMAND_ID,
            user_is_watching: false,
            no_more_commands: false,
            device_id: String::new(),
            command_type: String::new(),
            command_name: String::new(),
            index: None,
            argument: None,
        }
    }
}

impl<'a> Command<'a> {
    /// The end-of-batch sentinel for a message.
    ///
    /// The sentinel keeps the type of the last command so that it reaches the
    /// same prefix listeners as the batch it terminates.
    pub fn sentinel(user_is_watching: bool, command_type: impl Into<String>) -> Self {
        Self {
            user_is_watching,
            no_more_commands: true,
            command_type: command_type.into(),
            ..Self::default()
        }
    }

    /// Whether this is the end-of-batch sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.no_more_commands
    }

    /// The argument as text, with trailing line breaks removed.
    ///
    /// Returns `None` when there is no argument or it is not valid UTF-8.
    pub fn argument_str(&self) -> Option<&'a str> {
        self.argument
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(|s| s.trim_end_matches(['\r', '\n']))
    }

    /// Copy the command so it can outlive the dispatch.
    pub fn to_owned_event(&self) -> CommandEvent {
        CommandEvent {
            command_id: self.command_id,
            user_is_watching: self.user_is_watching,
            no_more_commands: self.no_more_commands,
            device_id: self.device_id.clone(),
            command_type: self.command_type.clone(),
            command_name: self.command_name.clone(),
            index: self.index,
            argument: self.argument_str().map(str::to_string),
        }
    }
}

/// Owned copy of a [`Command`], suitable for sending across tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub command_id: i64,
    pub user_is_watching: bool,
    pub no_more_commands: bool,
    pub device_id: String,
    pub command_type: String,
    pub command_name: String,
    pub index: Option<char>,
    pub argument: Option<String>,
}

impl CommandEvent {
    pub fn is_sentinel(&self) -> bool {
        self.no_more_commands
    }
}

/// Result code reported to the cloud for each command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultCode {
    Received = 0,
    Executed = 1,
    HubError = 2,
    HubNotSupported = 3,
    DeviceNotIdentified = 4,
    DeviceNotSupported = 5,
    DeviceConnectionError = 6,
    DeviceExecutionError = 7,
    WrongFormat = 8,
}

impl ResultCode {
    /// Numeric wire value.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Received => "received",
            ResultCode::Executed => "executed",
            ResultCode::HubError => "hub-error",
            ResultCode::HubNotSupported => "hub-not-supported",
            ResultCode::DeviceNotIdentified => "device-not-identified",
            ResultCode::DeviceNotSupported => "device-not-supported",
            ResultCode::DeviceConnectionError => "device-connection-error",
            ResultCode::DeviceExecutionError => "device-execution-error",
            ResultCode::WrongFormat => "wrong-format",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a telemetry element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamCategory {
    Profile,
    Measure,
    Alert,
}

impl ParamCategory {
    /// Element tag used on the wire.
    pub fn tag(self) -> &'static str {
        match self {
            ParamCategory::Profile => "profile",
            ParamCategory::Measure => "measure",
            ParamCategory::Alert => "alert",
        }
    }
}
