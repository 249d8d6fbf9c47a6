//! Inbound command protocol parser.
//!
//! Server-to-hub messages have the shape
//!
//! ```text
//! <s2h>
//!   <command cmdId="5" deviceId="D" type="set" name="power">
//!     <param index="0">1</param>
//!     <param index="1">0</param>
//!   </command>
//! </s2h>
//! ```
//!
//! The parser walks the document as a stream of events and dispatches
//! [`Command`]s to the [`CommandListeners`] while it goes:
//!
//! - one dispatch per closed `param`;
//! - one dispatch per closed `command` that had no `param` children, using
//!   the text found directly inside the command;
//! - one end-of-batch sentinel (`command_id == -1`) when `s2h` closes.
//!
//! A malformed attribute value leaves its field at the previous value. A
//! structurally broken document stops the walk and is reported as
//! [`Error::Parse`]; commands dispatched before the break stay dispatched.

use std::borrow::Cow;
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::command::{Command, COMMAND_NAME_MAX_LEN, COMMAND_TYPE_MAX_LEN, SENTINEL_COMMAND_ID};
use crate::config::protocol::USER_WATCHING_MARKER;
use crate::error::{Error, Result};
use crate::listeners::{CommandListeners, RawListener};

const TAG_S2H: &[u8] = b"s2h";
const TAG_COMMAND: &[u8] = b"command";
const TAG_PARAM: &[u8] = b"param";

const ATTR_COMMAND_ID: &[u8] = b"cmdId";
const ATTR_DEVICE_ID: &[u8] = b"deviceId";
const ATTR_TYPE: &[u8] = b"type";
const ATTR_NAME: &[u8] = b"name";
const ATTR_INDEX: &[u8] = b"index";

/// Outcome of one successful parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    /// Commands dispatched, including the sentinel.
    pub dispatched: usize,
    pub user_is_watching: bool,
}

/// Parses inbound messages and dispatches their commands.
pub struct CommandParser {
    listeners: Arc<CommandListeners>,
}

impl CommandParser {
    pub fn new(listeners: Arc<CommandListeners>) -> Self {
        Self { listeners }
    }

    pub fn listeners(&self) -> &Arc<CommandListeners> {
        &self.listeners
    }

    /// Parse `message` and dispatch every command it carries.
    pub fn parse(&self, message: &[u8]) -> Result<ParseSummary> {
        let user_is_watching = contains_marker(message);
        let mut state = ParseState::new(user_is_watching);
        let mut reader = Reader::from_reader(message);
        reader.check_end_names(true);

        let mut depth = 0usize;
        let mut saw_element = false;

        loop {
            let event = reader.read_event().map_err(|e| {
                Error::Parse(format!("at byte {}: {}", reader.buffer_position(), e))
            })?;
            match event {
                Event::Start(start) => {
                    depth += 1;
                    saw_element = true;
                    state.open(&start);
                }
                Event::Empty(start) => {
                    saw_element = true;
                    state.open(&start);
                    state.close(start.name().as_ref(), &self.listeners);
                }
                Event::End(end) => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        Error::Parse("closing tag without an open element".to_string())
                    })?;
                    state.close(end.name().as_ref(), &self.listeners);
                }
                Event::Text(text) if depth > 0 => {
                    // the slice reader always borrows from the input
                    if let Cow::Borrowed(raw) = text.into_inner() {
                        state.text(raw);
                    }
                }
                Event::CData(cdata) if depth > 0 => {
                    if let Cow::Borrowed(raw) = cdata.into_inner() {
                        state.text(raw);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err(Error::Parse(format!("{} element(s) left open", depth)));
        }
        if !saw_element {
            return Err(Error::Parse("document has no elements".to_string()));
        }

        Ok(ParseSummary {
            dispatched: state.dispatched,
            user_is_watching,
        })
    }
}

impl RawListener for CommandParser {
    fn on_message(&self, message: &[u8]) {
        match self.parse(message) {
            Ok(summary) => debug!(
                dispatched = summary.dispatched,
                user_is_watching = summary.user_is_watching,
                "Parsed inbound message"
            ),
            Err(e) => warn!(error = %e, "Dropping malformed inbound message"),
        }
    }
}

fn contains_marker(message: &[u8]) -> bool {
    let marker = USER_WATCHING_MARKER.as_bytes();
    message.windows(marker.len()).any(|w| w == marker)
}

/// Mutable scratch state carried across parse events.
struct ParseState<'a> {
    command: Command<'a>,
    param_seen: bool,
    dispatched: usize,
}

impl<'a> ParseState<'a> {
    fn new(user_is_watching: bool) -> Self {
        Self {
            command: Command {
                user_is_watching,
                ..Command::default()
            },
            param_seen: false,
            dispatched: 0,
        }
    }

    fn open(&mut self, start: &BytesStart<'_>) {
        match start.name().as_ref() {
            TAG_COMMAND => {
                self.param_seen = false;
                self.command.device_id.clear();
                self.command.command_name.clear();
                self.command.command_id = SENTINEL_COMMAND_ID;
                self.command.index = None;
                self.command.argument = None;
            }
            TAG_PARAM => {
                self.param_seen = true;
                self.command.index = None;
                self.command.argument = None;
            }
            _ => return,
        }
        self.apply_attributes(start);
    }

    fn apply_attributes(&mut self, start: &BytesStart<'_>) {
        for attr in start.attributes().flatten() {
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            match attr.key.as_ref() {
                ATTR_COMMAND_ID => {
                    if let Ok(id) = value.trim().parse::<i64>() {
                        self.command.command_id = id;
                    }
                }
                ATTR_DEVICE_ID => {
                    self.command.device_id = value.into_owned();
                }
                ATTR_TYPE => {
                    // type always precedes name, so it doubles as the default name
                    self.command.command_type = bounded(&value, COMMAND_TYPE_MAX_LEN);
                    self.command.command_name = bounded(&value, COMMAND_NAME_MAX_LEN);
                }
                ATTR_NAME => {
                    self.command.command_name = bounded(&value, COMMAND_NAME_MAX_LEN);
                }
                ATTR_INDEX => {
                    if let Some(index) = index_char(&value) {
                        self.command.index = Some(index);
                    }
                }
                _ => {}
            }
        }
    }

    fn text(&mut self, raw: &'a [u8]) {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        self.command.argument = Some(raw);
    }

    fn close(&mut self, name: &[u8], listeners: &CommandListeners) {
        match name {
            TAG_PARAM => self.dispatch(listeners),
            TAG_COMMAND if !self.param_seen => self.dispatch(listeners),
            TAG_S2H => {
                let sentinel = Command::sentinel(
                    self.command.user_is_watching,
                    self.command.command_type.clone(),
                );
                self.command = sentinel;
                self.dispatch(listeners);
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, listeners: &CommandListeners) {
        self.dispatched += 1;
        listeners.broadcast(&self.command);
    }
}

fn bounded(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Index attribute as a printable digit character (`value + '0'`).
fn index_char(value: &str) -> Option<char> {
    let n: i64 = value.trim().parse().ok()?;
    let code = u32::try_from(n).ok()?.checked_add(u32::from(b'0'))?;
    char::from_u32(code)
}
