//! Inbound message routing
//!
//! Decodes raw text frames into [`ClientFrame`] values and applies each
//! kind's effect against the registry. Decoding fails closed: a frame
//! must carry a recognized `type` tag and well-formed fields before any
//! handler runs, and validation failures are answered with an `error`
//! frame instead of mutating state.

use std::sync::Arc;

use meridian_protocol::{ClientFrame, ConnectionId, Position, ServerFrame};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::connection::{NameClaim, SessionRegistry};

/// Message kinds with a registered handler. Anything else is answered
/// with an unknown-type error.
const KNOWN_KINDS: [&str; 6] = [
    "join",
    "authenticate",
    "chat",
    "player-move",
    "update",
    "reconnect",
];

/// Routes every decoded client frame to its effect.
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Entry point for each raw text frame read off a connection.
    ///
    /// Never returns an error: every failure mode either answers the
    /// sender with an `error` frame or drops the message after logging.
    pub fn handle_raw(&self, id: ConnectionId, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                error!("❌ Error parsing message: {}", e);
                self.reply_error(id, "Invalid message format");
                return;
            }
        };
        // Without a type tag there is no handler to answer from, so the
        // frame is dropped rather than guessed at.
        let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
            warn!("Dropping message with no type field from {}", id);
            return;
        };
        info!("📨 Message from {}: {}", id, kind);
        if !KNOWN_KINDS.contains(&kind.as_str()) {
            info!("🤷 Unknown message type: {}", kind);
            self.reply_error(id, &format!("Unknown message type: {}", kind));
            return;
        }
        match serde_json::from_value::<ClientFrame>(value) {
            Ok(frame) => self.handle_frame(id, frame),
            Err(e) => {
                let reply = invalid_text(&kind);
                error!("❌ {}: {}", reply, e);
                self.reply_error(id, &reply);
            }
        }
    }

    fn handle_frame(&self, id: ConnectionId, frame: ClientFrame) {
        match frame {
            ClientFrame::Join { username } => self.handle_join(id, &username),
            ClientFrame::Authenticate { game_username } => {
                self.handle_authenticate(id, game_username)
            }
            ClientFrame::Chat { message, username } => self.handle_chat(id, message, username),
            ClientFrame::PlayerMove { position } => self.handle_player_move(id, position),
            // high-frequency client pings, intentionally not echoed
            ClientFrame::Update => {}
            ClientFrame::Reconnect { .. } => self.handle_reconnect(id),
        }
    }

    fn handle_join(&self, id: ConnectionId, username: &str) {
        match self.registry.bind_display_name(id, username) {
            NameClaim::Bound(name) => {
                let text = format!("{} joined the game", name);
                self.registry.broadcast_frame(
                    &ServerFrame::PlayerJoined {
                        username: name,
                        message: text.clone(),
                    },
                    None,
                );
                self.registry
                    .broadcast_frame(&ServerFrame::system_chat(text), None);
            }
            NameClaim::Taken => {
                self.reply_error(id, "Username is already taken");
            }
            NameClaim::Invalid => {
                error!("❌ Invalid join message from {}", id);
                self.reply_error(id, "Invalid join message");
            }
            NameClaim::Gone => {
                debug!("Join from unregistered connection {}", id);
            }
        }
    }

    /// Silent variant of join used by reconnection flows where presence
    /// was already announced.
    fn handle_authenticate(&self, id: ConnectionId, game_username: Option<String>) {
        let Some(name) = game_username else {
            return;
        };
        if let NameClaim::Bound(bound) = self.registry.bind_display_name(id, &name) {
            info!("🔑 Authenticated connection {} as {}", id, bound);
        }
    }

    fn handle_chat(&self, id: ConnectionId, message: Option<String>, username: Option<String>) {
        let text = message.unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let name = self
            .registry
            .display_name_of(id)
            .or(username)
            .unwrap_or_else(|| "Player".to_string());
        info!("💬 Chat from {}: {}", name, text);
        self.registry
            .broadcast_frame(&ServerFrame::chat(name, text), None);
    }

    fn handle_player_move(&self, id: ConnectionId, position: Position) {
        let Some(username) = self.registry.display_name_of(id) else {
            debug!("Ignoring move from connection {} with no username", id);
            return;
        };
        self.registry.broadcast_frame(
            &ServerFrame::PlayerPosition { username, position },
            Some(id),
        );
    }

    fn handle_reconnect(&self, id: ConnectionId) {
        info!("🔄 Reconnection request from {}", id);
        match self.registry.user_id_of(id) {
            Some(user) => {
                self.registry.bind_identity(id, user);
                self.registry.send_frame(
                    id,
                    &ServerFrame::ReconnectSuccess {
                        message: "Session restored".to_string(),
                    },
                );
            }
            None => {
                self.reply_error(id, "Reconnect failed: No user session");
            }
        }
    }

    fn reply_error(&self, id: ConnectionId, message: &str) {
        self.registry.send_frame(id, &ServerFrame::error(message));
    }
}

fn invalid_text(kind: &str) -> String {
    match kind {
        "player-move" => "Invalid player position".to_string(),
        _ => format!("Invalid {} message", kind),
    }
}
