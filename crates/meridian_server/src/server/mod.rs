//! Service lifecycle: accept loop, per-connection sessions, identity

mod core;
mod identity;
mod session;

pub use core::{RealtimeServer, ServerConfig};
pub use identity::{AnonymousIdentity, IdentityResolver};
