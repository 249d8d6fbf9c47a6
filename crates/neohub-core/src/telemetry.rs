//! Outbound telemetry message builder.
//!
//! A [`TelemetryMessage`] is a bounded buffer of self-contained elements,
//! one per reported value. Elements never straddle the capacity: an element
//! that does not fit is rejected whole and the message is left unchanged.
//! Sending a message without elements is a no-op, so callers can build a
//! message per pass without checking whether any device contributed.

use std::fmt::{Display, Write as _};

use bytes::Bytes;
use quick_xml::escape::escape;

use crate::command::{ParamCategory, ResultCode};
use crate::error::Result;

/// Destination for finished outbound payloads.
///
/// Implemented by the relay (in-process) and by the relay client
/// (out-of-process agents). Payloads are wrapped in the envelope downstream.
pub trait MessageSink: Send + Sync {
    fn submit(&self, payload: Bytes) -> Result<()>;
}

/// Bounded telemetry message under construction.
#[derive(Debug, Clone)]
pub struct TelemetryMessage {
    buf: String,
    capacity: usize,
    elements: usize,
}

impl TelemetryMessage {
    /// Start a new, empty message holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            capacity,
            elements: 0,
        }
    }

    /// Drop all content and start over with the same capacity.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.elements = 0;
    }

    /// Append one value element.
    ///
    /// Returns the number of bytes written, or 0 when the element does not
    /// fit in the remaining capacity (nothing is written in that case).
    pub fn add_value(
        &mut self,
        device_id: &str,
        device_type: &str,
        category: ParamCategory,
        name: &str,
        multiplier: Option<&str>,
        index: Option<char>,
        value: impl Display,
    ) -> usize {
        let element = format_element(
            device_id,
            device_type,
            category,
            name,
            multiplier,
            index,
            &value.to_string(),
            &timestamp(),
        );
        if element.len() > self.remaining() {
            return 0;
        }
        self.buf.push_str(&element);
        self.elements += 1;
        element.len()
    }

    /// Number of elements added so far.
    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Hand the message to `sink`.
    ///
    /// Returns `Ok(false)` without writing anything when the message has no
    /// elements.
    pub fn send(self, sink: &dyn MessageSink) -> Result<bool> {
        if self.elements == 0 {
            return Ok(false);
        }
        sink.submit(Bytes::from(self.buf))?;
        Ok(true)
    }

    /// Discard the message without sending it.
    pub fn abort(self) {}
}

fn format_element(
    device_id: &str,
    device_type: &str,
    category: ParamCategory,
    name: &str,
    multiplier: Option<&str>,
    index: Option<char>,
    value: &str,
    timestamp: &str,
) -> String {
    let tag = category.tag();
    let mut out = String::with_capacity(128 + value.len());
    let _ = write!(
        out,
        r#"<{tag} deviceId="{}" deviceType="{}" timestamp="{}"><param name="{}""#,
        escape(device_id),
        escape(device_type),
        timestamp,
        escape(name),
    );
    if let Some(multiplier) = multiplier {
        let _ = write!(out, r#" multiplier="{}""#, escape(multiplier));
    }
    if let Some(index) = index {
        let _ = write!(out, r#" index="{}""#, escape(&index.to_string()));
    }
    let _ = write!(out, ">{}</param></{tag}>", escape(value));
    out
}

/// Current local time as ISO-8601 with a `±hh:mm` offset.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Announce a newly registered device.
pub fn add_device_message(device_id: &str, device_type: &str) -> Bytes {
    Bytes::from(format!(
        r#"<add deviceId="{}" deviceType="{}"/>"#,
        escape(device_id),
        escape(device_type)
    ))
}

/// Alert that a device stopped responding and was removed.
pub fn device_gone_message(device_id: &str) -> Bytes {
    Bytes::from(format!(
        r#"<alert deviceId="{}" alertType="deviceGone" timestamp="{}"/>"#,
        escape(device_id),
        timestamp()
    ))
}

/// Report the result of a command.
pub fn command_result_message(command_id: i64, result: ResultCode) -> Bytes {
    Bytes::from(format!(
        r#"<response cmdId="{}" result="{}"/>"#,
        command_id,
        result.code()
    ))
}
