//! Broadcast channels backing topics and private queues.

use crate::gateway::Outbound;
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A named fan-out channel.
///
/// Receivers that fall more than `capacity` payloads behind skip the
/// oldest ones (`RecvError::Lagged`).
#[derive(Debug)]
pub struct Channel {
    /// Channel name.
    name: String,
    /// Broadcast sender for this channel.
    sender: broadcast::Sender<Outbound>,
    /// Channel capacity.
    capacity: usize,
}

impl Channel {
    /// Create a new channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new channel with a specific capacity.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
            capacity,
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a receiver for payloads published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.sender.subscribe()
    }

    /// Get the number of live receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the channel has no live receivers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriber_count() == 0
    }

    /// Publish a payload.
    ///
    /// Returns the number of receivers it was queued for.
    pub fn publish(&self, payload: Outbound) -> usize {
        trace!(channel = %self.name, "Publishing");
        self.sender.send(payload).unwrap_or_default()
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
