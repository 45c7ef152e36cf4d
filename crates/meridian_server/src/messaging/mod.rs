//! Decoding and routing of inbound frames

mod router;

pub use router::MessageRouter;
