//! Per-connection bookkeeping and the outbox command channel
//!
//! Each connection owns a bounded mpsc outbox. The registry enqueues
//! commands on the sender half; a dedicated writer task drains the receiver
//! half into the socket sink, so no two sends ever race on one transport.

use std::sync::Arc;

use meridian_protocol::{timestamp_ms, Origin};
use tokio::sync::mpsc;
use tracing::debug;

/// Commands consumed by a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Serialized JSON frame to deliver as a text message
    Frame(Arc<String>),
    /// Pong reply carrying the ping payload
    Pong(Vec<u8>),
    /// Close the transport with a normal-closure code, then stop writing
    Close { reason: String },
}

/// Transport lifecycle state tracked by the registry.
///
/// There is no closed variant: a closed connection is purged from the
/// registry entirely, so absence means closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, websocket handshake not finished yet
    Connecting,
    /// Handshake complete, frames flow in both directions
    Open,
}

/// Registry-side record of one live connection.
pub(crate) struct ConnectionHandle {
    pub origin: Origin,
    pub state: ConnectionState,
    pub connected_at: u64,
    outbox: mpsc::Sender<Outbound>,
    /// Commands dropped because the outbox was full
    dropped: u64,
}

impl ConnectionHandle {
    /// Creates a handle plus the receiver its writer task will drain.
    pub fn new(origin: Origin, outbox_capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbox, rx) = mpsc::channel(outbox_capacity);
        let handle = Self {
            origin,
            state: ConnectionState::Connecting,
            connected_at: timestamp_ms(),
            outbox,
            dropped: 0,
        };
        (handle, rx)
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Non-blocking enqueue. A full or closed outbox counts as a failed send.
    pub fn try_send(&mut self, command: Outbound) -> bool {
        match self.outbox.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                self.dropped += 1;
                debug!("Dropping outbound command: {}", e);
                false
            }
        }
    }

    pub fn try_send_text(&mut self, text: Arc<String>) -> bool {
        self.try_send(Outbound::Frame(text))
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
