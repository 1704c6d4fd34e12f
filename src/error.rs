//! Error taxonomy for the listen-and-credit bridge.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by a bridge through its deferred results, its terminal
/// stream signal, or directly to a caller.
///
/// Cloneable so the same failure can resolve a deferred result and be sent
/// downstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The listener could not be bound. The bridge never ran.
    #[error("failed to bind {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    /// A command to the socket driver failed after the listener was bound.
    #[error("connection error: {0}")]
    Connection(String),

    /// An unbind was requested but the listener did not confirm closure.
    #[error("unbind failed: {0}")]
    UnbindFailed(String),

    /// The publisher already has its one subscriber.
    #[error("publisher already has a subscriber")]
    AlreadySubscribed,

    /// The bridge went away before resolving this result.
    #[error("bridge released before completing")]
    Released,
}

impl BridgeError {
    /// Whether this error means the listener was never established.
    pub fn is_bind_failure(&self) -> bool {
        matches!(self, Self::BindFailed { .. })
    }
}
