//! Sliding-window message log.
//!
//! Appends push to the end of `Document::messages` and then drop the oldest
//! entries until the log fits `max_len`. Dropped history is gone; nothing is
//! archived and nobody is told.

use crate::document::{Document, Message};

/// Maximum number of retained messages.
pub const MAX_LOG: usize = 150;

/// Append + truncate policy for the message sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLog {
    max_len: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self { max_len: MAX_LOG }
    }
}

impl MessageLog {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Push `message` and left-truncate to `max_len`.
    pub fn append(&self, mut doc: Document, message: Message) -> Document {
        doc.messages.push(message);
        self.truncate(&mut doc.messages);
        doc
    }

    fn truncate(&self, messages: &mut Vec<Message>) {
        if messages.len() > self.max_len {
            let excess = messages.len() - self.max_len;
            messages.drain(..excess);
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Grouping
// ───────────────────────────────────────────────────────────────────

/// One bubble inside a sender block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub text: String,
    pub timestamp: u64,
}

/// A visual unit of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageGroup {
    /// A system notice, always standalone.
    Notice { text: String, timestamp: u64 },
    /// Consecutive chat messages from one sender.
    Block {
        sender: String,
        /// Sent under the local identity.
        own: bool,
        first_timestamp: u64,
        entries: Vec<BlockEntry>,
    },
}

/// Fold an ordered message list into notices and per-sender blocks.
///
/// A notice closes the running block, so the same sender on both sides of a
/// notice yields two blocks.
pub fn group_messages(messages: &[Message], local_identity: Option<&str>) -> Vec<MessageGroup> {
    let mut groups: Vec<MessageGroup> = Vec::new();
    let mut open_block = false;

    for message in messages {
        match message {
            Message::SystemNotice { text, timestamp } => {
                groups.push(MessageGroup::Notice {
                    text: text.clone(),
                    timestamp: *timestamp,
                });
                open_block = false;
            }
            Message::Chat {
                sender,
                text,
                timestamp,
            } => {
                let entry = BlockEntry {
                    text: text.clone(),
                    timestamp: *timestamp,
                };
                if open_block {
                    if let Some(MessageGroup::Block {
                        sender: current,
                        entries,
                        ..
                    }) = groups.last_mut()
                    {
                        if current == sender {
                            entries.push(entry);
                            continue;
                        }
                    }
                }
                groups.push(MessageGroup::Block {
                    sender: sender.clone(),
                    own: local_identity == Some(sender.as_str()),
                    first_timestamp: *timestamp,
                    entries: vec![entry],
                });
                open_block = true;
            }
        }
    }

    groups
}
