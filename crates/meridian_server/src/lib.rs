//! # Meridian Realtime Server
//!
//! WebSocket connection and session management for multiplayer browser
//! games. The crate keeps one authoritative registry of live connections,
//! routes the game's message kinds, and runs each connection's lifecycle
//! from accept to purge.
//!
//! ## Core Components
//!
//! * **Session registry** - Connection handles plus user, display-name and
//!   origin indices behind a single lock, so replacement (eviction of an
//!   older connection from the same origin or the same user) is atomic
//! * **Message router** - Tagged-frame decoding that fails closed, with a
//!   handler per message kind (join, authenticate, chat, player-move,
//!   update, reconnect)
//! * **Session lifecycle** - One task per connection for reads, one for
//!   writes; the connecting state queues outbound messages until the ack
//!   flushes them in order
//! * **Identity resolution** - A trait seam so the embedding application
//!   decides how upgrade requests map to user ids
//!
//! ## Message Flow
//!
//! 1. Client connects; the connection is registered before the handshake
//!    completes and an ack frame is sent once it opens
//! 2. Each inbound text frame is decoded by its `type` tag and routed
//! 3. Handlers mutate the registry and fan out chat, presence and
//!    position events
//! 4. On disconnect the connection is purged exactly once and departure
//!    events are broadcast if a display name was bound
//!
//! ## Embedding
//!
//! The usual embedding is one [`RealtimeServer`] per process:
//!
//! ```no_run
//! use std::sync::Arc;
//! use meridian_server::{AnonymousIdentity, RealtimeServer, ServerConfig};
//!
//! # async fn run() -> Result<(), meridian_server::ServerError> {
//! let server = RealtimeServer::new(ServerConfig::default(), Arc::new(AnonymousIdentity));
//! server.run().await
//! # }
//! ```
//!
//! Game-state layers keep a [`SessionRegistry`] handle from
//! [`RealtimeServer::registry`] and push their own JSON payloads through
//! `send_value_to_user` and `broadcast_value`.

// Re-export core types for easy access
pub use connection::SessionRegistry;
pub use error::ServerError;
pub use messaging::MessageRouter;
pub use server::{AnonymousIdentity, IdentityResolver, RealtimeServer, ServerConfig};

// Public module declarations
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod server;
pub mod shutdown;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_server_creation() {
        let server = RealtimeServer::new(ServerConfig::default(), Arc::new(AnonymousIdentity));
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_handle_is_shared() {
        let server = RealtimeServer::new(ServerConfig::default(), Arc::new(AnonymousIdentity));
        let registry = server.registry();

        let (_id, _rx) = registry.register(meridian_protocol::Origin::new("203.0.113.1"));
        assert_eq!(server.connection_count(), 1);
    }
}
