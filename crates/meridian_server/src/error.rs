//! Server error types

use thiserror::Error;

/// Errors surfaced by the realtime server itself.
///
/// Per-connection failures never show up here; they are logged, answered
/// with an `error` frame, or folded into boolean send results. This enum
/// covers faults that affect the whole service, such as failing to bind
/// the listen address.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Internal error: {0}")]
    Internal(String),
}
