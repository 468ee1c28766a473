//! Identity extraction
//!
//! Splits the raw message into header block and body and pulls the two sender
//! identities out of the invocation: the envelope sender handed over by the
//! transport and the `From` header claimed by the message itself.

use crate::address::{AddressError, NormalizedAddress};

/// Transport-level identity for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipients: Vec<String>,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            sender: sender.into(),
            recipients,
        }
    }

    /// Recipients as one space-delimited string, the form used in logs and reports.
    pub fn recipient_list(&self) -> String {
        self.recipients.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("empty message")]
    Empty,
    #[error("no blank line between headers and body")]
    MissingSeparator,
    #[error("malformed header line {line}: {content:?}")]
    MalformedHeader { line: usize, content: String },
}

/// Header block of a parsed message, unfolded, in original order.
#[derive(Debug, Clone, Default)]
pub struct MessageHeaders {
    fields: Vec<(String, String)>,
}

impl MessageHeaders {
    /// Split `raw` at the first empty line and parse everything above it.
    pub fn parse(raw: &[u8]) -> Result<Self, MessageError> {
        if raw.is_empty() {
            return Err(MessageError::Empty);
        }

        let header_len = header_block_len(raw).ok_or(MessageError::MissingSeparator)?;
        let block = String::from_utf8_lossy(&raw[..header_len]);

        let mut fields: Vec<(String, String)> = Vec::new();
        for (idx, line) in block.lines().enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            // Folded continuation of the previous field
            if line.starts_with(' ') || line.starts_with('\t') {
                match fields.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                        continue;
                    }
                    None => {
                        return Err(MessageError::MalformedHeader {
                            line: idx + 1,
                            content: line.to_string(),
                        })
                    }
                }
            }

            match line.split_once(':') {
                Some((name, value)) if !name.is_empty() && !name.contains(char::is_whitespace) => {
                    fields.push((name.to_string(), value.trim().to_string()));
                }
                _ => {
                    return Err(MessageError::MalformedHeader {
                        line: idx + 1,
                        content: line.to_string(),
                    })
                }
            }
        }

        Ok(Self { fields })
    }

    /// First value of the named field, case-insensitive on the name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Length of the header block including its terminating blank line, if there is one.
fn header_block_len(raw: &[u8]) -> Option<usize> {
    // A message that opens with a blank line has an empty header block
    if raw.starts_with(b"\r\n") {
        return Some(2);
    }
    if raw.starts_with(b"\n") {
        return Some(1);
    }

    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\n' {
            let rest = &raw[i + 1..];
            if rest.starts_with(b"\r\n") {
                return Some(i + 3);
            }
            if rest.starts_with(b"\n") {
                return Some(i + 2);
            }
        }
        i += 1;
    }
    None
}

/// Raw `From` header value, empty when the message carries none.
pub fn header_sender(raw: &[u8]) -> Result<String, MessageError> {
    let headers = MessageHeaders::parse(raw)?;
    Ok(headers.get("From").unwrap_or_default().to_string())
}

/// Both sender identities of one message, raw and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identities {
    pub envelope_sender: String,
    pub envelope: NormalizedAddress,
    pub header_sender: String,
    pub header: NormalizedAddress,
}

impl Identities {
    /// Normalize both raw senders. Fails on the first one that does not normalize.
    pub fn from_senders(envelope_sender: &str, header_sender: &str) -> Result<Self, AddressError> {
        Ok(Self {
            envelope_sender: envelope_sender.to_string(),
            envelope: NormalizedAddress::parse(envelope_sender)?,
            header_sender: header_sender.to_string(),
            header: NormalizedAddress::parse(header_sender)?,
        })
    }
}
