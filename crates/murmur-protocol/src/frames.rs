//! Frame types for the Murmur protocol.
//!
//! Frames are the unit of communication between a client and the relay.
//! Client frames carry chat events; server frames carry deliveries,
//! presence updates and errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current protocol version, announced in the `connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Destinations a delivery can be addressed to.
pub mod destinations {
    /// Public chat topic, received by every connected client.
    pub const PUBLIC: &str = "/topic/public";
    /// Presence topic carrying the list of online users.
    pub const USERS: &str = "/topic/users";
    /// A user's private queue.
    pub const PRIVATE_QUEUE: &str = "/user/queue/private";
}

/// Codes carried by `error` frames.
pub mod error_codes {
    /// Event violates the connection's lifecycle (e.g. registering twice).
    pub const PROTOCOL: u16 = 4000;
    /// Event is missing a required field or exceeds a limit.
    pub const VALIDATION: u16 = 4001;
    /// Connection is already bound to another identity.
    pub const ALREADY_BOUND: u16 = 4002;
    /// Frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 4003;
}

/// Frame type identifiers, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Register,
    Chat,
    Private,
    Leave,
    Ping,
    Connected,
    Message,
    Users,
    Error,
    Pong,
}

impl FrameType {
    /// Get the wire name of this frame type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Register => "register",
            FrameType::Chat => "chat",
            FrameType::Private => "private",
            FrameType::Leave => "leave",
            FrameType::Ping => "ping",
            FrameType::Connected => "connected",
            FrameType::Message => "message",
            FrameType::Users => "users",
            FrameType::Error => "error",
            FrameType::Pong => "pong",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// Ordinary public message.
    Chat,
    /// Synthetic notice that a user joined.
    Join,
    /// Synthetic notice that a user left.
    Leave,
    /// Direct message to a single user.
    Private,
}

/// A chat message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Display name of the author.
    pub sender: String,
    /// Message body.
    pub content: String,
    /// Addressee of a private message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Announce presence under a display name.
    Register {
        /// Display name to register.
        sender: String,
    },

    /// Broadcast a message to every participant.
    Chat {
        /// Claimed author.
        sender: String,
        /// Message body.
        content: String,
    },

    /// Send a direct message.
    Private {
        /// Claimed author.
        sender: String,
        /// Message body.
        content: String,
        /// Addressee. Required; a frame without one is rejected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver: Option<String>,
    },

    /// Leave the chat.
    Leave {
        /// Claimed author.
        sender: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp, echoed in the pong.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientFrame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            ClientFrame::Register { .. } => FrameType::Register,
            ClientFrame::Chat { .. } => FrameType::Chat,
            ClientFrame::Private { .. } => FrameType::Private,
            ClientFrame::Leave { .. } => FrameType::Leave,
            ClientFrame::Ping { .. } => FrameType::Ping,
        }
    }

    /// Create a new Register frame.
    #[must_use]
    pub fn register(sender: impl Into<String>) -> Self {
        ClientFrame::Register {
            sender: sender.into(),
        }
    }

    /// Create a new Chat frame.
    #[must_use]
    pub fn chat(sender: impl Into<String>, content: impl Into<String>) -> Self {
        ClientFrame::Chat {
            sender: sender.into(),
            content: content.into(),
        }
    }

    /// Create a new Private frame addressed to `receiver`.
    #[must_use]
    pub fn private(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        ClientFrame::Private {
            sender: sender.into(),
            content: content.into(),
            receiver: Some(receiver.into()),
        }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(sender: impl Into<String>) -> Self {
        ClientFrame::Leave {
            sender: sender.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        ClientFrame::Ping { timestamp }
    }
}

/// A frame sent by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Connection established.
    Connected {
        /// Identifier the relay assigned to this connection.
        connection_id: String,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A chat message delivered to a topic or private queue.
    Message {
        /// Where the message was delivered.
        destination: String,
        /// The message itself.
        message: ChatPayload,
    },

    /// The set of users currently online.
    Users {
        /// Destination of the presence topic.
        destination: String,
        /// Presence version; higher versions supersede lower ones.
        version: u64,
        /// Online display names, sorted.
        users: Vec<String>,
    },

    /// An inbound frame was rejected.
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerFrame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            ServerFrame::Connected { .. } => FrameType::Connected,
            ServerFrame::Message { .. } => FrameType::Message,
            ServerFrame::Users { .. } => FrameType::Users,
            ServerFrame::Error { .. } => FrameType::Error,
            ServerFrame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        ServerFrame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerFrame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        assert_eq!(ClientFrame::register("alice").frame_type(), FrameType::Register);
        assert_eq!(ClientFrame::chat("alice", "hi").frame_type(), FrameType::Chat);
        assert_eq!(ServerFrame::pong(None).frame_type(), FrameType::Pong);
        assert_eq!(FrameType::Private.to_string(), "private");
    }

    #[test]
    fn test_client_frame_json_shape() {
        let json = serde_json::to_value(ClientFrame::private("alice", "bob", "hey")).unwrap();
        assert_eq!(json["type"], "private");
        assert_eq!(json["sender"], "alice");
        assert_eq!(json["receiver"], "bob");
        assert_eq!(json["content"], "hey");
    }

    #[test]
    fn test_private_without_receiver_parses() {
        // Missing and null receivers both decode; the router rejects them.
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"private","sender":"alice","content":"hey"}"#)
                .unwrap();
        assert!(matches!(frame, ClientFrame::Private { receiver: None, .. }));

        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"private","sender":"alice","content":"hey","receiver":null}"#,
        )
        .unwrap();
        assert!(matches!(frame, ClientFrame::Private { receiver: None, .. }));
    }

    #[test]
    fn test_register_ignores_extra_fields() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"register","sender":"alice","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(frame, ClientFrame::register("alice"));
    }

    #[test]
    fn test_message_kind_wire_names() {
        let payload = ChatPayload {
            sender: "alice".into(),
            content: "alice joined the chat!".into(),
            receiver: None,
            kind: MessageKind::Join,
            timestamp: 1,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "JOIN");
        assert!(json.get("receiver").is_none());
    }

    #[test]
    fn test_connected_carries_version() {
        match ServerFrame::connected("conn-1", 30_000) {
            ServerFrame::Connected { version, .. } => assert_eq!(version, PROTOCOL_VERSION),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
