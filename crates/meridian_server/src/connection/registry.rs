//! The authoritative connection registry
//!
//! Owns every live connection and all derived indices: user bindings,
//! display names, origin sets, pending queues, welcome markers. All of it
//! sits behind one mutex so that eviction-then-insert is atomic and no two
//! connections can stay live for one origin or one user. Methods never
//! block or await while holding the lock; delivery is a non-blocking
//! enqueue on the target connection's outbox.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use meridian_protocol::{timestamp_ms, ConnectionId, Origin, ServerFrame, UserId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::handle::{ConnectionHandle, ConnectionState, Outbound};

/// Outbox depth used when none is configured.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Close reason sent on origin replacement.
pub const REASON_REPLACED_CONNECTION: &str = "Replaced by newer connection";
/// Close reason sent on identity replacement.
pub const REASON_REPLACED_SESSION: &str = "Replaced by newer session";
/// Close reason sent to every connection during service shutdown.
pub const REASON_SHUTDOWN: &str = "Server shutting down";

/// Result of a display-name claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameClaim {
    /// Name installed; carries the trimmed form that was stored
    Bound(String),
    /// A different live connection already holds this name
    Taken,
    /// Empty or all-whitespace name
    Invalid,
    /// The connection is no longer registered
    Gone,
}

/// Bindings that were still attached to a connection when it was purged.
///
/// Both fields are `None` when the id was already gone, which makes
/// repeated purges safe to act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub display_name: Option<String>,
    pub user_id: Option<UserId>,
}

/// Per-broadcast delivery tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub sent: usize,
    pub skipped: usize,
    pub errors: usize,
}

struct RegistryInner {
    conns: HashMap<ConnectionId, ConnectionHandle>,
    user_to_conn: HashMap<UserId, ConnectionId>,
    conn_to_user: HashMap<ConnectionId, UserId>,
    names: HashMap<ConnectionId, String>,
    origins: HashMap<Origin, HashSet<ConnectionId>>,
    pending: HashMap<ConnectionId, Vec<Arc<String>>>,
    welcome_sent: HashSet<ConnectionId>,
}

impl RegistryInner {
    fn new() -> Self {
        Self {
            conns: HashMap::new(),
            user_to_conn: HashMap::new(),
            conn_to_user: HashMap::new(),
            names: HashMap::new(),
            origins: HashMap::new(),
            pending: HashMap::new(),
            welcome_sent: HashSet::new(),
        }
    }

    /// Closes and purges every connection currently held by `origin`.
    fn evict_origin(&mut self, origin: &Origin) {
        let stale: Vec<ConnectionId> = match self.origins.get(origin) {
            Some(members) if !members.is_empty() => members.iter().copied().collect(),
            _ => return,
        };
        warn!(
            "⚠️ Multiple connections from {}, closing previous connections",
            origin
        );
        let notice = serialize(&ServerFrame::ConnectionReplaced {
            message: "Your connection was replaced by a new one".to_string(),
        });
        for id in stale {
            if let Some(handle) = self.conns.get_mut(&id) {
                if let Some(text) = notice.clone() {
                    handle.try_send_text(text);
                }
                handle.try_send(Outbound::Close {
                    reason: REASON_REPLACED_CONNECTION.to_string(),
                });
            }
            self.purge(id);
        }
    }

    /// Removes `id` from every index. Safe to call repeatedly.
    fn purge(&mut self, id: ConnectionId) -> PurgeOutcome {
        if let Some(handle) = self.conns.remove(&id) {
            if handle.dropped() > 0 {
                debug!(
                    "Connection {} dropped {} outbound commands",
                    id,
                    handle.dropped()
                );
            }
            debug!(
                "Connection {} from {} purged after {} ms",
                id,
                handle.origin,
                timestamp_ms().saturating_sub(handle.connected_at)
            );
        }
        self.origins.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        let display_name = self.names.remove(&id);
        self.pending.remove(&id);
        self.welcome_sent.remove(&id);
        let user_id = self.conn_to_user.remove(&id);
        if let Some(user) = &user_id {
            // Only drop the forward binding if it still points at this
            // connection; a newer connection may already hold the user.
            if self.user_to_conn.get(user) == Some(&id) {
                self.user_to_conn.remove(user);
            }
        }
        PurgeOutcome {
            display_name,
            user_id,
        }
    }

    /// Marks the connection open, sends the ack, then flushes the pending
    /// queue in insertion order.
    fn open(&mut self, id: ConnectionId, ack: Arc<String>) -> bool {
        let Some(handle) = self.conns.get_mut(&id) else {
            return false;
        };
        handle.state = ConnectionState::Open;
        info!("✅ WebSocket opened: {}", id);
        handle.try_send_text(ack);
        if let Some(queued) = self.pending.remove(&id) {
            debug!("Flushing {} pending messages to {}", queued.len(), id);
            for text in queued {
                handle.try_send_text(text);
            }
        }
        true
    }

    /// Applies the per-connection delivery contract: open connections get
    /// the message on their outbox, connecting ones get it queued, anything
    /// else is a failed send.
    fn deliver(&mut self, id: ConnectionId, text: Arc<String>) -> bool {
        let Some(handle) = self.conns.get_mut(&id) else {
            return false;
        };
        match handle.state {
            ConnectionState::Open => handle.try_send_text(text),
            ConnectionState::Connecting => {
                self.pending.entry(id).or_default().push(text);
                true
            }
        }
    }

    fn fan_out(&mut self, text: &Arc<String>, exclude: Option<ConnectionId>) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        for (id, handle) in self.conns.iter_mut() {
            if Some(*id) == exclude {
                stats.skipped += 1;
                continue;
            }
            match handle.state {
                ConnectionState::Open => {
                    if handle.try_send_text(Arc::clone(text)) {
                        stats.sent += 1;
                    } else {
                        stats.errors += 1;
                    }
                }
                ConnectionState::Connecting => {
                    self.pending.entry(*id).or_default().push(Arc::clone(text));
                    stats.sent += 1;
                }
            }
        }
        stats
    }
}

/// Process-wide store for all live connections.
///
/// Created once at service start and passed explicitly to the router and
/// the session lifecycle; torn down with [`SessionRegistry::shutdown_all`].
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    outbox_capacity: usize,
}

impl SessionRegistry {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::new()),
            outbox_capacity,
        }
    }

    /// Registers a fresh connection for `origin` and returns its id along
    /// with the outbox receiver for the connection's writer task.
    ///
    /// Any prior connections from the same origin are notified, closed and
    /// purged before the new one is indexed.
    pub fn register(&self, origin: Origin) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = ConnectionId::new();
        info!("🔗 New connection: {} from IP: {}", id, origin);
        let (handle, rx) = ConnectionHandle::new(origin.clone(), self.outbox_capacity);
        let mut inner = self.inner.lock();
        inner.evict_origin(&origin);
        inner.conns.insert(id, handle);
        inner.origins.entry(origin).or_default().insert(id);
        (id, rx)
    }

    /// Binds `user` to `id`, closing and purging any other connection that
    /// held the user. Rebinding the same connection is a cheap no-op apart
    /// from refreshing the maps.
    pub fn bind_identity(&self, id: ConnectionId, user: UserId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.conns.contains_key(&id) {
            warn!(
                "Cannot associate user {} with unknown connection {}",
                user, id
            );
            return false;
        }
        if let Some(prior) = inner.user_to_conn.get(&user).copied() {
            if prior != id {
                if let Some(handle) = inner.conns.get_mut(&prior) {
                    handle.try_send(Outbound::Close {
                        reason: REASON_REPLACED_SESSION.to_string(),
                    });
                }
                inner.purge(prior);
            }
        }
        inner.user_to_conn.insert(user.clone(), id);
        inner.conn_to_user.insert(id, user.clone());
        info!("👤 Associated user {} with connection {}", user, id);
        true
    }

    /// Claims a display name for `id`. Names are trimmed before comparison
    /// and must be unique among live connections; the first claim wins and
    /// later claimants are rejected, never evicted.
    pub fn bind_display_name(&self, id: ConnectionId, name: &str) -> NameClaim {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return NameClaim::Invalid;
        }
        let mut inner = self.inner.lock();
        if !inner.conns.contains_key(&id) {
            return NameClaim::Gone;
        }
        let taken = inner
            .names
            .iter()
            .any(|(other, existing)| existing == trimmed && *other != id);
        if taken {
            return NameClaim::Taken;
        }
        inner.names.insert(id, trimmed.to_string());
        info!("👤 Set username {} for connection {}", trimmed, id);
        NameClaim::Bound(trimmed.to_string())
    }

    /// Transitions `id` to open, delivering `ack` first and the pending
    /// queue right after, in insertion order. Returns `false` when the
    /// connection was evicted while still connecting.
    pub fn mark_open(&self, id: ConnectionId, ack: &ServerFrame) -> bool {
        let Some(text) = serialize(ack) else {
            return false;
        };
        self.inner.lock().open(id, text)
    }

    /// Claims the one-time welcome for `id`. Only the first call per
    /// connection returns `true`.
    pub fn claim_welcome(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        inner.conns.contains_key(&id) && inner.welcome_sent.insert(id)
    }

    /// Removes `id` from every index and reports the bindings it held.
    pub fn purge(&self, id: ConnectionId) -> PurgeOutcome {
        self.inner.lock().purge(id)
    }

    pub fn send_frame(&self, id: ConnectionId, frame: &ServerFrame) -> bool {
        let Some(text) = serialize(frame) else {
            return false;
        };
        self.inner.lock().deliver(id, text)
    }

    /// Unicast to whichever connection currently holds `user`.
    pub fn send_frame_to_user(&self, user: &UserId, frame: &ServerFrame) -> bool {
        let Some(text) = serialize(frame) else {
            return false;
        };
        self.send_text_to_user(user, text, frame.kind())
    }

    /// Unicast an application payload supplied by the game-state layer.
    /// The payload is transported verbatim; only its `type` field is read,
    /// for logging.
    pub fn send_value_to_user(&self, user: &UserId, payload: &serde_json::Value) -> bool {
        let Some(text) = serialize(payload) else {
            return false;
        };
        self.send_text_to_user(user, text, value_kind(payload))
    }

    pub fn broadcast_frame(
        &self,
        frame: &ServerFrame,
        exclude: Option<ConnectionId>,
    ) -> BroadcastStats {
        let Some(text) = serialize(frame) else {
            return BroadcastStats::default();
        };
        self.broadcast_text(text, frame.kind(), exclude)
    }

    /// Fan-out for application payloads supplied by the game-state layer.
    pub fn broadcast_value(
        &self,
        payload: &serde_json::Value,
        exclude: Option<ConnectionId>,
    ) -> BroadcastStats {
        let Some(text) = serialize(payload) else {
            return BroadcastStats::default();
        };
        let kind = value_kind(payload).to_string();
        self.broadcast_text(text, &kind, exclude)
    }

    /// Pong reply routed through the outbox so socket writes stay
    /// serialized in the writer task.
    pub fn send_pong(&self, id: ConnectionId, payload: Vec<u8>) -> bool {
        let mut inner = self.inner.lock();
        match inner.conns.get_mut(&id) {
            Some(handle) if handle.is_open() => handle.try_send(Outbound::Pong(payload)),
            _ => false,
        }
    }

    /// Asks every live connection to close gracefully, then releases all
    /// registry state.
    pub fn shutdown_all(&self) {
        let mut inner = self.inner.lock();
        let count = inner.conns.len();
        if count > 0 {
            info!("🛑 Closing {} connections", count);
        }
        for handle in inner.conns.values_mut() {
            handle.try_send(Outbound::Close {
                reason: REASON_SHUTDOWN.to_string(),
            });
        }
        inner.conns.clear();
        inner.user_to_conn.clear();
        inner.conn_to_user.clear();
        inner.names.clear();
        inner.origins.clear();
        inner.pending.clear();
        inner.welcome_sent.clear();
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.lock().conns.contains_key(&id)
    }

    pub fn state_of(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.inner.lock().conns.get(&id).map(|handle| handle.state)
    }

    pub fn display_name_of(&self, id: ConnectionId) -> Option<String> {
        self.inner.lock().names.get(&id).cloned()
    }

    pub fn user_id_of(&self, id: ConnectionId) -> Option<UserId> {
        self.inner.lock().conn_to_user.get(&id).cloned()
    }

    pub fn connection_for_user(&self, user: &UserId) -> Option<ConnectionId> {
        self.inner.lock().user_to_conn.get(user).copied()
    }

    pub fn connections_for_origin(&self, origin: &Origin) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .origins
            .get(origin)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn connected_users(&self) -> Vec<UserId> {
        self.inner.lock().user_to_conn.keys().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().conns.len()
    }

    pub fn pending_count(&self, id: ConnectionId) -> usize {
        self.inner
            .lock()
            .pending
            .get(&id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn send_text_to_user(&self, user: &UserId, text: Arc<String>, kind: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(id) = inner.user_to_conn.get(user).copied() else {
            warn!("⚠️ User {} not found for message: {}", user, kind);
            return false;
        };
        inner.deliver(id, text)
    }

    fn broadcast_text(
        &self,
        text: Arc<String>,
        kind: &str,
        exclude: Option<ConnectionId>,
    ) -> BroadcastStats {
        let stats = self.inner.lock().fan_out(&text, exclude);
        info!(
            "📡 Broadcasted {} to {} clients, {} skipped, {} errors",
            kind, stats.sent, stats.skipped, stats.errors
        );
        stats
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}

fn serialize<T: Serialize>(value: &T) -> Option<Arc<String>> {
    match serde_json::to_string(value) {
        Ok(text) => Some(Arc::new(text)),
        Err(e) => {
            warn!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}

fn value_kind(payload: &serde_json::Value) -> &str {
    payload
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
}
