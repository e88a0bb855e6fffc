//! Error types for the gossip transport.

use std::io;

/// Errors surfaced by the transport.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    /// The configured bind address did not parse as "host:port".
    #[error("invalid bind address '{addr}': {reason}")]
    InvalidBindAddr { addr: String, reason: String },

    /// Binding the UDP socket or TCP listener failed.
    #[error("failed to bind transport on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A join attempt reached none of the given peers.
    #[error("no peer reachable out of {attempted}: {last}")]
    JoinFailed { attempted: usize, last: String },

    /// A push/pull exchange with a single peer failed.
    #[error("push/pull with {addr} failed: {source}")]
    PushPull {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
