//! Message types for Murmur.
//!
//! A message is created by the publisher right before it is handed to a
//! [`MessageBuffer`](crate::MessageBuffer); after that it is immutable.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A unique message identifier.
///
/// Ids are random UUIDs: they are unique but carry no ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a message ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random message ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for MessageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Message body, opaque to the buffer.
    pub body: String,
    /// Optional author name supplied by the publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Milliseconds since the Unix epoch when the message was created.
    pub timestamp: u64,
}

impl Message {
    /// Create a new message with a freshly generated id.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self::with_id(MessageId::generate(), body)
    }

    /// Create a message with a caller-chosen id.
    #[must_use]
    pub fn with_id(id: impl Into<MessageId>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            author: None,
            timestamp: now_millis(),
        }
    }

    /// Attach an author name.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Size of the body in bytes.
    #[must_use]
    pub fn body_size(&self) -> usize {
        self.body.len()
    }
}
