//! Per-connection session lifecycle
//!
//! Each accepted TCP stream runs one session task through the connection
//! state machine: register while connecting, finish the upgrade
//! handshake, mark open (ack plus pending flush), pump inbound frames
//! through the router, then purge exactly once and announce the
//! departure. The session never writes to the socket itself; a companion
//! writer task owns the sink and drains the connection's outbox, so all
//! writes for one socket stay serialized.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use meridian_protocol::{ConnectionId, Origin, ServerFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::identity::IdentityResolver;
use crate::connection::{Outbound, SessionRegistry};
use crate::messaging::MessageRouter;

/// Drives one connection from accept to purge.
pub(crate) async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    router: Arc<MessageRouter>,
    resolver: Arc<dyn IdentityResolver>,
    welcome_delay: Duration,
) {
    let origin = Origin::from_addr(&peer_addr);
    // Registered before the handshake so replacement checks see this
    // connection from the very first moment.
    let (id, outbox_rx) = registry.register(origin.clone());

    let mut query: Option<String> = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        query = req.uri().query().map(str::to_string);
        Ok(response)
    };
    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {}: {}", id, e);
            registry.purge(id);
            return;
        }
    };
    let (sink, mut reader) = ws.split();
    let writer = tokio::spawn(run_writer(id, sink, outbox_rx));

    if let Some(user) = resolver.resolve(&origin, query.as_deref()).await {
        registry.bind_identity(id, user);
    }

    let ack = ServerFrame::Connection {
        message: "Connected to Meridian server".to_string(),
        socket_id: id,
        ip: origin.to_string(),
    };
    if !registry.mark_open(id, &ack) {
        // Evicted during the handshake; the writer still flushes the
        // replacement notice and close that are sitting in the outbox.
        debug!("Connection {} was replaced before opening", id);
        let _ = writer.await;
        return;
    }

    if registry.claim_welcome(id) {
        let welcome_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(welcome_delay).await;
            welcome_registry.send_frame(
                id,
                &ServerFrame::system_chat("Welcome to Meridian! Type / to chat."),
            );
        });
    }

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if !registry.contains(id) {
                    break;
                }
                router.handle_raw(id, text.as_str());
            }
            Ok(Message::Ping(payload)) => {
                registry.send_pong(id, payload.to_vec());
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                warn!("Dropping binary frame from {}", id);
                registry.send_frame(id, &ServerFrame::error("Invalid message format"));
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                error!("❌ WebSocket error for {}: {}", id, e);
                registry.send_frame(id, &ServerFrame::error("Connection error occurred"));
                break;
            }
        }
    }

    info!("🔌 WebSocket closed: {}", id);
    let outcome = registry.purge(id);
    if let Some(username) = outcome.display_name {
        let text = format!("{} left the game", username);
        registry.broadcast_frame(&ServerFrame::PlayerLeft { username }, None);
        registry.broadcast_frame(&ServerFrame::system_chat(text), None);
    }
    // Purge dropped the outbox sender, so the writer drains and exits.
    let _ = writer.await;
}

/// Owns the socket's write half and applies outbox commands in order.
async fn run_writer(
    id: ConnectionId,
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbox: mpsc::Receiver<Outbound>,
) {
    while let Some(command) = outbox.recv().await {
        match command {
            Outbound::Frame(text) => {
                if let Err(e) = sink.send(Message::text(text.as_str())).await {
                    debug!("Write to {} failed: {}", id, e);
                    break;
                }
            }
            Outbound::Pong(payload) => {
                if sink.send(Message::Pong(payload.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close { reason } => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}
