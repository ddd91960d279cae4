//! # murmur-protocol
//!
//! Wire protocol definitions for the Murmur chat relay.
//!
//! Clients and the relay exchange tagged frames over a WebSocket. Browser
//! clients send JSON text messages; native clients may use the binary
//! encoding (length-prefixed MessagePack).
//!
//! ## Frame Types
//!
//! - `register` / `leave` - Presence announcements
//! - `chat` - Broadcast to every participant
//! - `private` - Direct message to a named peer
//! - `message` / `users` - Deliveries from the relay
//! - `error` - Rejected events
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::chat("alice", "hello");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, CodecError, Encoding};
pub use frames::{
    destinations, error_codes, ChatPayload, ClientFrame, FrameType, MessageKind, ServerFrame,
    PROTOCOL_VERSION,
};
