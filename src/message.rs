use std::collections::HashMap;
use std::fmt;

use crate::error::{GatewayError, GatewayResult};

/// Name of the recipient header on an [`SmsMessage`].
pub const HEADER_TO: &str = "To";
/// Name of the sender header on an [`SmsMessage`].
pub const HEADER_SENDER: &str = "Sender";

/// An SMS message with zero or more headers and a possibly empty body.
///
/// Header names must start with a word character (A-Za-z0-9_) followed by
/// zero or more word characters and/or dashes. Header values may contain any
/// characters except line breaks; whitespace at either end is trimmed.
/// Setting a header to an empty or blank value removes it with a logged
/// warning, so an empty value is never stored.
///
/// The serialised form is one `Name: value` line per header, a mandatory
/// blank line, and the body (remaining lines joined with `\n`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmsMessage {
    headers: HashMap<String, String>,
    body: String,
}

fn valid_header_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl SmsMessage {
    /// Message with no headers and the empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a message from its serialised text form.
    ///
    /// Fails on an invalid header line or when the headers are not
    /// terminated by a blank line.
    pub fn parse(text: &str) -> GatewayResult<Self> {
        let mut msg = SmsMessage::new();
        let mut lines = text.lines();

        let mut terminated = false;
        for line in lines.by_ref() {
            let line = line.trim();
            if line.is_empty() {
                terminated = true;
                break;
            }
            msg.add_header_line(line)?;
        }
        if !terminated {
            return Err(GatewayError::message(
                "invalid message: headers not terminated by empty line",
            ));
        }

        msg.body = lines.collect::<Vec<_>>().join("\n");
        Ok(msg)
    }

    /// Parse a message from UTF-8 bytes.
    pub fn parse_bytes(bytes: &[u8]) -> GatewayResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| GatewayError::message("message is not valid UTF-8"))?;
        Self::parse(text)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Add or replace a header. An empty or blank value removes the header
    /// with a logged warning.
    pub fn set_header(&mut self, name: &str, value: &str) -> GatewayResult<()> {
        if !valid_header_name(name) {
            return Err(GatewayError::message(format!("invalid header name: {}", name)));
        }
        let value = value.trim();
        if value.is_empty() {
            tracing::warn!(header = name, "header set to empty value is removed");
            self.headers.remove(name);
        } else if value.contains('\n') || value.contains('\r') {
            return Err(GatewayError::message(
                "invalid header value: must not contain line breaks",
            ));
        } else {
            self.headers.insert(name.to_string(), value.to_string());
        }
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    /// Parse a `Name: value` line and set the header.
    fn add_header_line(&mut self, line: &str) -> GatewayResult<()> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| GatewayError::message(format!("invalid message header: '{}'", line)))?;
        let name = name.trim_end();
        if !valid_header_name(name) {
            return Err(GatewayError::message(format!("invalid message header: '{}'", line)));
        }
        self.set_header(name, value)
    }

    /// The text body, never absent (possibly empty).
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }
}

impl fmt::Display for SmsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        writeln!(f)?;
        write!(f, "{}", self.body)
    }
}
