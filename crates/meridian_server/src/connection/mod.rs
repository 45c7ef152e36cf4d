//! Connection state and the registry that owns it

mod handle;
mod registry;

pub use handle::{ConnectionState, Outbound};
pub use registry::{
    BroadcastStats, NameClaim, PurgeOutcome, SessionRegistry, DEFAULT_OUTBOX_CAPACITY,
    REASON_REPLACED_CONNECTION, REASON_REPLACED_SESSION, REASON_SHUTDOWN,
};
