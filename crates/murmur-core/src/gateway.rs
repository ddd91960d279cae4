//! Outbound delivery: topics, delivery plans and the gateway trait.
//!
//! The router never talks to a transport directly. It produces a
//! [`DeliveryPlan`] and hands it to a [`DeliveryGateway`], which performs
//! the fan-out. Delivery is fire-and-forget: nothing is confirmed or retried.

use crate::message::{Identity, Message};
use crate::presence::PresenceSnapshot;
use murmur_protocol::{destinations, ServerFrame};
use std::fmt;
use std::sync::Arc;

/// Name of the per-identity queue private messages are delivered to.
pub const PRIVATE_QUEUE: &str = "private";

/// A shared broadcast topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Public chat messages and join/leave notices.
    Public,
    /// Presence snapshots.
    Users,
}

impl Topic {
    /// Get the destination clients see this topic as.
    #[must_use]
    pub fn destination(self) -> &'static str {
        match self {
            Topic::Public => destinations::PUBLIC,
            Topic::Users => destinations::USERS,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.destination())
    }
}

/// Payload of a delivery. Cheap to clone for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A chat message.
    Chat(Arc<Message>),
    /// A presence snapshot.
    Presence(Arc<PresenceSnapshot>),
}

impl Outbound {
    /// Build the frame a client receives for this payload at `destination`.
    #[must_use]
    pub fn to_frame(&self, destination: &str) -> ServerFrame {
        match self {
            Outbound::Chat(message) => ServerFrame::Message {
                destination: destination.to_string(),
                message: message.to_payload(),
            },
            Outbound::Presence(snapshot) => snapshot.to_frame(),
        }
    }

    /// Get the chat message, if this is one.
    #[must_use]
    pub fn as_chat(&self) -> Option<&Message> {
        match self {
            Outbound::Chat(message) => Some(message),
            Outbound::Presence(_) => None,
        }
    }

    /// Get the presence snapshot, if this is one.
    #[must_use]
    pub fn as_presence(&self) -> Option<&PresenceSnapshot> {
        match self {
            Outbound::Presence(snapshot) => Some(snapshot),
            Outbound::Chat(_) => None,
        }
    }
}

impl From<Message> for Outbound {
    fn from(message: Message) -> Self {
        Outbound::Chat(Arc::new(message))
    }
}

impl From<PresenceSnapshot> for Outbound {
    fn from(snapshot: PresenceSnapshot) -> Self {
        Outbound::Presence(Arc::new(snapshot))
    }
}

/// A single outbound effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Send to every subscriber of a topic.
    Broadcast {
        /// Target topic.
        topic: Topic,
        /// What to send.
        payload: Outbound,
    },
    /// Send to one identity's queue.
    Unicast {
        /// Addressee.
        recipient: Identity,
        /// Queue name.
        queue: &'static str,
        /// What to send.
        payload: Outbound,
    },
}

/// The deliveries produced by one inbound event, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryPlan {
    deliveries: Vec<Delivery>,
}

impl DeliveryPlan {
    /// Create an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a broadcast.
    pub fn broadcast(&mut self, topic: Topic, payload: impl Into<Outbound>) {
        self.deliveries.push(Delivery::Broadcast {
            topic,
            payload: payload.into(),
        });
    }

    /// Append a unicast to `recipient`'s private queue.
    pub fn unicast(&mut self, recipient: Identity, payload: impl Into<Outbound>) {
        self.deliveries.push(Delivery::Unicast {
            recipient,
            queue: PRIVATE_QUEUE,
            payload: payload.into(),
        });
    }

    /// Move every delivery of `other` to the end of this plan.
    pub fn append(&mut self, mut other: DeliveryPlan) {
        self.deliveries.append(&mut other.deliveries);
    }

    /// Check if the plan does nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Get the number of deliveries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    /// Iterate over deliveries in order.
    pub fn iter(&self) -> impl Iterator<Item = &Delivery> {
        self.deliveries.iter()
    }

    /// Iterate over broadcasts.
    pub fn broadcasts(&self) -> impl Iterator<Item = (Topic, &Outbound)> {
        self.deliveries.iter().filter_map(|d| match d {
            Delivery::Broadcast { topic, payload } => Some((*topic, payload)),
            Delivery::Unicast { .. } => None,
        })
    }

    /// Iterate over unicasts.
    pub fn unicasts(&self) -> impl Iterator<Item = (&Identity, &Outbound)> {
        self.deliveries.iter().filter_map(|d| match d {
            Delivery::Unicast {
                recipient, payload, ..
            } => Some((recipient, payload)),
            Delivery::Broadcast { .. } => None,
        })
    }

    /// Perform every delivery on `gateway`, in order.
    pub fn deliver(&self, gateway: &dyn DeliveryGateway) {
        for delivery in &self.deliveries {
            match delivery {
                Delivery::Broadcast { topic, payload } => {
                    gateway.broadcast(*topic, payload.clone());
                }
                Delivery::Unicast {
                    recipient,
                    queue,
                    payload,
                } => gateway.unicast(recipient, queue, payload.clone()),
            }
        }
    }
}

/// The sink for outbound deliveries.
///
/// Implementations must not block: both calls are made while the router is
/// processing an event.
pub trait DeliveryGateway: Send + Sync {
    /// Deliver `payload` to every subscriber of `topic`.
    fn broadcast(&self, topic: Topic, payload: Outbound);

    /// Deliver `payload` to `recipient`'s `queue`.
    fn unicast(&self, recipient: &Identity, queue: &str, payload: Outbound);
}

impl<G: DeliveryGateway + ?Sized> DeliveryGateway for Arc<G> {
    fn broadcast(&self, topic: Topic, payload: Outbound) {
        (**self).broadcast(topic, payload);
    }

    fn unicast(&self, recipient: &Identity, queue: &str, payload: Outbound) {
        (**self).unicast(recipient, queue, payload);
    }
}
