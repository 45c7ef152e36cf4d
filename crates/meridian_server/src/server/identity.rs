//! Pluggable identity resolution

use async_trait::async_trait;
use meridian_protocol::{Origin, UserId};

/// Resolves the user identity for a connection at handshake time.
///
/// The embedding application decides where identities come from: the
/// upgrade request's query string, a session store, or nothing at all.
/// Returning `None` leaves the connection anonymous until a later
/// `reconnect` or game-level flow binds one.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, origin: &Origin, query: Option<&str>) -> Option<UserId>;
}

/// Default resolver: every connection starts anonymous.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousIdentity;

#[async_trait]
impl IdentityResolver for AnonymousIdentity {
    async fn resolve(&self, _origin: &Origin, _query: Option<&str>) -> Option<UserId> {
        None
    }
}
