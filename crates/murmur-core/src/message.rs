//! Identities and chat messages.

use murmur_protocol::{ChatPayload, MessageKind};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Default maximum identity length in bytes.
pub const DEFAULT_MAX_IDENTITY_LENGTH: usize = 64;

/// A display name a client registers under.
///
/// Identities are opaque: two connections may claim the same name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create a new identity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identity, returning the name.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reasons an inbound event is rejected as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Identity is empty or whitespace.
    #[error("Identity cannot be empty")]
    EmptyIdentity,

    /// Identity exceeds the configured maximum.
    #[error("Identity too long: {len} bytes (max {max})")]
    IdentityTooLong { len: usize, max: usize },

    /// Private message without an addressee.
    #[error("Private message requires a receiver")]
    MissingReceiver,

    /// Message body exceeds the configured maximum.
    #[error("Content too long: {len} bytes (max {max})")]
    ContentTooLong { len: usize, max: usize },
}

/// Validate a display name.
///
/// # Errors
///
/// Returns an error if the name is empty or longer than `max_len` bytes.
pub fn validate_identity(name: &str, max_len: usize) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyIdentity);
    }
    if name.len() > max_len {
        return Err(ValidationError::IdentityTooLong {
            len: name.len(),
            max: max_len,
        });
    }
    Ok(())
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A chat message routed through the relay.
///
/// Messages are built from an inbound event and shared as `Arc<Message>`
/// once handed to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Author.
    pub sender: Identity,
    /// Message body.
    pub content: String,
    /// Addressee, for private messages.
    pub receiver: Option<Identity>,
    /// Message kind.
    pub kind: MessageKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Message {
    /// Create a new message stamped with the current time.
    #[must_use]
    pub fn new(kind: MessageKind, sender: Identity, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            receiver: None,
            kind,
            timestamp: now_millis(),
        }
    }

    /// Create a public chat message.
    #[must_use]
    pub fn chat(sender: Identity, content: impl Into<String>) -> Self {
        Self::new(MessageKind::Chat, sender, content)
    }

    /// Create a private message for `receiver`.
    #[must_use]
    pub fn private(sender: Identity, receiver: Identity, content: impl Into<String>) -> Self {
        Self::new(MessageKind::Private, sender, content).with_receiver(receiver)
    }

    /// Create the notice broadcast when `sender` joins.
    #[must_use]
    pub fn join_notice(sender: Identity) -> Self {
        let content = format!("{sender} joined the chat!");
        Self::new(MessageKind::Join, sender, content)
    }

    /// Create the notice broadcast when `sender` leaves.
    #[must_use]
    pub fn leave_notice(sender: Identity) -> Self {
        let content = format!("{sender} left the chat!");
        Self::new(MessageKind::Leave, sender, content)
    }

    /// Set the addressee.
    #[must_use]
    pub fn with_receiver(mut self, receiver: Identity) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Convert to the wire representation.
    #[must_use]
    pub fn to_payload(&self) -> ChatPayload {
        ChatPayload {
            sender: self.sender.to_string(),
            content: self.content.clone(),
            receiver: self.receiver.as_ref().map(ToString::to_string),
            kind: self.kind,
            timestamp: self.timestamp,
        }
    }
}
