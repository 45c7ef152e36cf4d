//! Wire types shared between the Meridian realtime server and its clients
//!
//! Every frame on the socket is a JSON object tagged by a `type` field.
//! Inbound frames decode into [`ClientFrame`], outbound frames serialize
//! from [`ServerFrame`]. Kind tags are kebab-case, field names camelCase.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Core Identifiers
// ============================================================================

/// Unique identifier for a live connection, generated at accept time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque external user identifier, resolved outside this crate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network origin of a connection, normally the peer IP address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin(pub String);

impl Origin {
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    pub fn from_addr(addr: &std::net::SocketAddr) -> Self {
        Self(addr.ip().to_string())
    }

    /// Placeholder origin for transports whose peer address is unavailable
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Game Types
// ============================================================================

/// 2D world position reported by clients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// ============================================================================
// Inbound Frames (client -> server)
// ============================================================================

/// Messages a client may send, tagged by `type`
///
/// Unknown tags and structurally invalid payloads fail to decode; callers
/// decide per kind whether that earns an [`ServerFrame::Error`] reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Claim a display name and announce presence
    Join { username: String },
    /// Bind a display name without any presence announcement
    #[serde(rename_all = "camelCase")]
    Authenticate { game_username: Option<String> },
    /// Chat line, relayed to every connection
    Chat {
        message: Option<String>,
        username: Option<String>,
    },
    /// Position update, relayed to everyone except the sender
    PlayerMove { position: Position },
    /// High-frequency client ping, never echoed
    Update,
    /// Ask the server to restore a prior session binding
    Reconnect { token: Option<String> },
}

// ============================================================================
// Outbound Frames (server -> client)
// ============================================================================

/// Messages the server emits, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// First frame on every connection, echoing the assigned id
    #[serde(rename_all = "camelCase")]
    Connection {
        message: String,
        socket_id: ConnectionId,
        ip: String,
    },
    /// Human-readable failure reply, connection stays open
    Error { message: String },
    /// Chat line from a player or from the system
    Chat {
        id: String,
        username: String,
        message: String,
        timestamp: u64,
    },
    /// A player claimed a display name
    PlayerJoined { username: String, message: String },
    /// A player with a bound display name disconnected
    PlayerLeft { username: String },
    /// Position relay for a named player
    PlayerPosition { username: String, position: Position },
    /// Sent to a connection evicted by a newer one from the same origin
    ConnectionReplaced { message: String },
    /// Reply to a successful reconnect request
    ReconnectSuccess { message: String },
}

/// Author of system chat lines
pub const SYSTEM_USERNAME: &str = "System";
/// Message id carried by system chat lines
pub const SYSTEM_CHAT_ID: &str = "system";

impl ServerFrame {
    /// Chat line authored by a player, with a fresh message id
    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Chat {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            message: message.into(),
            timestamp: timestamp_ms(),
        }
    }

    /// Chat line authored by the server itself
    pub fn system_chat(message: impl Into<String>) -> Self {
        Self::Chat {
            id: SYSTEM_CHAT_ID.to_string(),
            username: SYSTEM_USERNAME.to_string(),
            message: message.into(),
            timestamp: timestamp_ms(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire tag of this frame, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Connection { .. } => "connection",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Chat { .. } => "chat",
            ServerFrame::PlayerJoined { .. } => "player-joined",
            ServerFrame::PlayerLeft { .. } => "player-left",
            ServerFrame::PlayerPosition { .. } => "player-position",
            ServerFrame::ConnectionReplaced { .. } => "connection-replaced",
            ServerFrame::ReconnectSuccess { .. } => "reconnect-success",
        }
    }
}

// ============================================================================
// Time
// ============================================================================

/// Milliseconds since the Unix epoch, the timestamp unit used on the wire
///
/// # Panics
///
/// Panics if the system clock is set before the Unix epoch.
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn client_frame_kinds_use_kebab_case_tags() {
        let frame: ClientFrame =
            serde_json::from_value(json!({ "type": "join", "username": "Alice" })).unwrap();
        assert!(matches!(frame, ClientFrame::Join { ref username } if username == "Alice"));

        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "player-move",
            "position": { "x": 1.5, "y": -2 }
        }))
        .unwrap();
        match frame {
            ClientFrame::PlayerMove { position } => {
                assert_eq!(position, Position::new(1.5, -2.0));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn authenticate_uses_camel_case_field() {
        let frame: ClientFrame =
            serde_json::from_value(json!({ "type": "authenticate", "gameUsername": "Bob" }))
                .unwrap();
        match frame {
            ClientFrame::Authenticate { game_username } => {
                assert_eq!(game_username.as_deref(), Some("Bob"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn update_tolerates_arbitrary_extra_fields() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "update",
            "tick": 42,
            "payload": { "anything": true }
        }))
        .unwrap();
        assert!(matches!(frame, ClientFrame::Update));
    }

    #[test]
    fn unknown_kind_fails_to_decode() {
        let result: Result<ClientFrame, _> =
            serde_json::from_value(json!({ "type": "teleport", "x": 1 }));
        assert!(result.is_err());
    }

    #[test]
    fn join_without_username_fails_to_decode() {
        let result: Result<ClientFrame, _> = serde_json::from_value(json!({ "type": "join" }));
        assert!(result.is_err());
    }

    #[test]
    fn connection_frame_uses_camel_case_socket_id() {
        let id = ConnectionId::new();
        let frame = ServerFrame::Connection {
            message: "hello".to_string(),
            socket_id: id,
            ip: "127.0.0.1".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "connection");
        assert_eq!(value["socketId"], Value::String(id.to_string()));
        assert_eq!(value["ip"], "127.0.0.1");
    }

    #[test]
    fn system_chat_carries_reserved_identity() {
        let frame = ServerFrame::system_chat("hello there");
        match &frame {
            ServerFrame::Chat {
                id,
                username,
                message,
                timestamp,
            } => {
                assert_eq!(id, SYSTEM_CHAT_ID);
                assert_eq!(username, SYSTEM_USERNAME);
                assert_eq!(message, "hello there");
                assert!(*timestamp > 0);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(frame.kind(), "chat");
    }

    #[test]
    fn player_chats_get_distinct_ids() {
        let a = ServerFrame::chat("Alice", "hi");
        let b = ServerFrame::chat("Alice", "hi");
        match (a, b) {
            (ServerFrame::Chat { id: id_a, .. }, ServerFrame::Chat { id: id_b, .. }) => {
                assert_ne!(id_a, id_b);
                assert_ne!(id_a, SYSTEM_CHAT_ID);
            }
            _ => panic!("expected chat frames"),
        }
    }

    #[test]
    fn replacement_notice_round_trips_with_kebab_tag() {
        let frame = ServerFrame::ConnectionReplaced {
            message: "Your connection was replaced by a new one".to_string(),
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"connection-replaced\""));
        let back: ServerFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind(), "connection-replaced");
    }
}
