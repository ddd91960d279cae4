//! In-process delivery gateway.
//!
//! The hub owns one broadcast channel per topic and one per identity's
//! private queue. Connection workers subscribe to the channels they care
//! about and forward payloads to their socket.

use crate::channel::{Channel, DEFAULT_CHANNEL_CAPACITY};
use crate::gateway::{DeliveryGateway, Outbound, Topic, PRIVATE_QUEUE};
use crate::message::Identity;
use dashmap::DashMap;
use murmur_protocol::destinations;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Fan-out hub implementing [`DeliveryGateway`].
#[derive(Debug)]
pub struct Hub {
    public: Channel,
    users: Channel,
    /// Private queues indexed by identity.
    private: DashMap<Identity, Channel>,
    capacity: usize,
}

impl Hub {
    /// Create a hub with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a hub whose channels buffer `capacity` payloads per receiver.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            public: Channel::with_capacity(destinations::PUBLIC, capacity),
            users: Channel::with_capacity(destinations::USERS, capacity),
            private: DashMap::new(),
            capacity,
        }
    }

    fn topic(&self, topic: Topic) -> &Channel {
        match topic {
            Topic::Public => &self.public,
            Topic::Users => &self.users,
        }
    }

    /// Subscribe to a topic.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Outbound> {
        self.topic(topic).subscribe()
    }

    /// Subscribe to `identity`'s private queue, creating it if needed.
    pub fn subscribe_private(&self, identity: &Identity) -> broadcast::Receiver<Outbound> {
        self.private
            .entry(identity.clone())
            .or_insert_with(|| {
                debug!(identity = %identity, "Creating private queue");
                let name = format!("{}/{}", destinations::PRIVATE_QUEUE, identity);
                Channel::with_capacity(name, self.capacity)
            })
            .subscribe()
    }

    /// Drop `identity`'s private queue if nobody is receiving from it.
    ///
    /// Call after dropping the receiver returned by
    /// [`subscribe_private`](Self::subscribe_private).
    pub fn release_private(&self, identity: &Identity) {
        if self
            .private
            .remove_if(identity, |_, channel| channel.is_empty())
            .is_some()
        {
            debug!(identity = %identity, "Deleted empty private queue");
        }
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            public_subscribers: self.public.subscriber_count(),
            users_subscribers: self.users.subscriber_count(),
            private_queues: self.private.len(),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryGateway for Hub {
    fn broadcast(&self, topic: Topic, payload: Outbound) {
        let recipients = self.topic(topic).publish(payload);
        trace!(topic = %topic, recipients, "Broadcast");
    }

    fn unicast(&self, recipient: &Identity, queue: &str, payload: Outbound) {
        if queue != PRIVATE_QUEUE {
            debug!(recipient = %recipient, queue, "Unicast to unknown queue dropped");
            return;
        }

        match self.private.get(recipient) {
            Some(channel) => {
                let recipients = channel.publish(payload);
                trace!(recipient = %recipient, recipients, "Unicast");
            }
            None => debug!(recipient = %recipient, "Unicast to offline identity dropped"),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStats {
    /// Receivers on the public topic.
    pub public_subscribers: usize,
    /// Receivers on the users topic.
    pub users_subscribers: usize,
    /// Number of live private queues.
    pub private_queues: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::presence::PresenceSnapshot;

    #[test]
    fn test_broadcast_reaches_topic_subscribers() {
        let hub = Hub::new();
        let mut public1 = hub.subscribe(Topic::Public);
        let mut public2 = hub.subscribe(Topic::Public);
        let mut users = hub.subscribe(Topic::Users);

        hub.broadcast(Topic::Public, Message::chat("alice".into(), "hi").into());

        assert_eq!(public1.try_recv().unwrap().as_chat().unwrap().content, "hi");
        assert!(public2.try_recv().is_ok());
        assert!(users.try_recv().is_err());
    }

    #[test]
    fn test_presence_on_users_topic() {
        let hub = Hub::new();
        let mut users = hub.subscribe(Topic::Users);

        hub.broadcast(Topic::Users, PresenceSnapshot::default().into());

        assert!(users.try_recv().unwrap().as_presence().is_some());
    }

    #[test]
    fn test_unicast_reaches_only_recipient() {
        let hub = Hub::new();
        let mut bob = hub.subscribe_private(&"bob".into());
        let mut carol = hub.subscribe_private(&"carol".into());
        let mut public = hub.subscribe(Topic::Public);

        let message = Message::private("alice".into(), "bob".into(), "hey");
        hub.unicast(&"bob".into(), PRIVATE_QUEUE, message.into());

        assert_eq!(bob.try_recv().unwrap().as_chat().unwrap().content, "hey");
        assert!(carol.try_recv().is_err());
        assert!(public.try_recv().is_err());
    }

    #[test]
    fn test_unicast_to_offline_identity_is_dropped() {
        let hub = Hub::new();
        hub.unicast(
            &"nobody".into(),
            PRIVATE_QUEUE,
            Message::chat("alice".into(), "hi").into(),
        );
        assert_eq!(hub.stats().private_queues, 0);
    }

    #[test]
    fn test_shared_name_receives_on_every_connection() {
        let hub = Hub::new();
        let mut first = hub.subscribe_private(&"bob".into());
        let mut second = hub.subscribe_private(&"bob".into());

        hub.unicast(
            &"bob".into(),
            PRIVATE_QUEUE,
            Message::private("alice".into(), "bob".into(), "hey").into(),
        );

        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn test_release_private() {
        let hub = Hub::new();
        let rx1 = hub.subscribe_private(&"bob".into());
        let rx2 = hub.subscribe_private(&"bob".into());
        assert_eq!(hub.stats().private_queues, 1);

        drop(rx1);
        hub.release_private(&"bob".into());
        assert_eq!(hub.stats().private_queues, 1);

        drop(rx2);
        hub.release_private(&"bob".into());
        assert_eq!(hub.stats().private_queues, 0);
    }
}
