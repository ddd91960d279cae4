//! # murmur-core
//!
//! Presence tracking, session binding and message routing for the Murmur
//! chat relay.
//!
//! This crate provides the building blocks of the relay:
//!
//! - **Presence** - The set of identities currently in the chat
//! - **Session** - Per-connection lifecycle and connection → identity bindings
//! - **Router** - Turns inbound events into delivery plans
//! - **Gateway** - The delivery sink, plus the in-process [`Hub`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│   Gateway   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │
//!                        ▼       ▼
//!              ┌──────────┐   ┌──────────┐
//!              │ Presence │   │ Bindings │
//!              └──────────┘   └──────────┘
//! ```

pub mod channel;
pub mod gateway;
pub mod hub;
pub mod message;
pub mod presence;
pub mod router;
pub mod session;

pub use channel::Channel;
pub use gateway::{Delivery, DeliveryGateway, DeliveryPlan, Outbound, Topic, PRIVATE_QUEUE};
pub use hub::{Hub, HubStats};
pub use message::{Identity, Message, ValidationError};
pub use presence::{PresenceRegistry, PresenceSnapshot};
pub use router::{
    InboundEvent, MessageRouter, ProtocolError, RouterConfig, RouterError, RouterStats,
};
pub use session::{AlreadyBoundError, ConnectionId, Session, SessionBinding, SessionState};
