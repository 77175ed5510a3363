//! The shared document and its codec.
//!
//! The whole room lives in one JSON value under one store key:
//! ```text
//! {
//!   "messages": [ {"type":"system","text":"Ana joined","ts":…},
//!                 {"type":"msg","name":"Ana","text":"oi","ts":…} ],
//!   "typing":   { "Ben": <last keystroke, ms since epoch> }
//! }
//! ```
//!
//! Every client reads and rewrites the entire value; the last writer wins.
//! A missing or unreadable value is treated as an empty room.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Malformed document: {0}")]
    Deserialize(String),
}

/// One entry of the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Synthetic join/leave notice.
    #[serde(rename = "system")]
    SystemNotice {
        text: String,
        #[serde(rename = "ts", deserialize_with = "lenient_millis")]
        timestamp: u64,
    },
    /// Text sent by a participant.
    #[serde(rename = "msg")]
    Chat {
        #[serde(rename = "name")]
        sender: String,
        text: String,
        #[serde(rename = "ts", deserialize_with = "lenient_millis")]
        timestamp: u64,
    },
}

impl Message {
    pub fn notice(text: impl Into<String>, timestamp: u64) -> Self {
        Message::SystemNotice {
            text: text.into(),
            timestamp,
        }
    }

    pub fn chat(sender: impl Into<String>, text: impl Into<String>, timestamp: u64) -> Self {
        Message::Chat {
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Message::SystemNotice { text, .. } | Message::Chat { text, .. } => text,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Message::SystemNotice { timestamp, .. } | Message::Chat { timestamp, .. } => *timestamp,
        }
    }

    /// Sender name, `None` for system notices.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Message::SystemNotice { .. } => None,
            Message::Chat { sender, .. } => Some(sender),
        }
    }

    pub fn is_notice(&self) -> bool {
        matches!(self, Message::SystemNotice { .. })
    }
}

/// The entire shared state of a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Oldest first, bounded by the writer.
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
    /// Display name -> last typing activity (ms since epoch).
    #[serde(default, deserialize_with = "lenient_typing")]
    pub typing: BTreeMap<String, u64>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to the store's textual value.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    /// Parse a stored value.
    pub fn decode(value: &str) -> Result<Self, CodecError> {
        serde_json::from_str(value).map_err(|e| CodecError::Deserialize(e.to_string()))
    }

    /// Build the working document from whatever the store returned.
    ///
    /// Absent and malformed values both yield the empty document. Any
    /// JSON number is accepted as a timestamp; other malformations (wrong
    /// shapes, unknown message types) still discard the whole value, and the
    /// next write from this client then replaces the stored log with an
    /// empty one.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            None => Self::default(),
            Some(raw) => Self::decode(raw).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable room document ({} bytes): {e}", raw.len());
                Self::default()
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.typing.is_empty()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Timestamp as written by any client: unsigned, signed or float ms.
#[derive(Deserialize)]
#[serde(untagged)]
enum Millis {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl From<Millis> for u64 {
    fn from(millis: Millis) -> Self {
        match millis {
            Millis::Unsigned(n) => n,
            Millis::Signed(n) => u64::try_from(n).unwrap_or(0),
            // Saturating cast: negative and NaN become 0
            Millis::Float(f) => f as u64,
        }
    }
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Millis::deserialize(deserializer).map(u64::from)
}

fn lenient_typing<'de, D>(deserializer: D) -> Result<BTreeMap<String, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: BTreeMap<String, Millis> = null_as_default(deserializer)?;
    Ok(entries
        .into_iter()
        .map(|(name, millis)| (name, u64::from(millis)))
        .collect())
}
