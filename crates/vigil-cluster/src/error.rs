//! Error types for the cluster layer.
//!
//! Only misconfiguration surfaces as an error: a peer that cannot reach
//! its seeds still comes up and keeps retrying. Runtime anomalies (decode
//! failures, events for unknown peers, failed reconnects) are logged and
//! absorbed.

use std::io;

use vigil_gossip::GossipError;

/// Errors surfaced by [`Peer::join`](crate::Peer::join) and
/// [`Peer::leave`](crate::Peer::leave).
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The bind address did not parse as "ip:port".
    #[error("invalid listen address '{addr}': {reason}")]
    InvalidBindAddr { addr: String, reason: String },

    /// The advertise address did not parse as "ip:port".
    #[error("invalid advertise address '{addr}': {reason}")]
    InvalidAdvertiseAddr { addr: String, reason: String },

    /// A seed peer was not given in "host:port" form.
    #[error("invalid seed peer '{addr}': expected host:port")]
    InvalidSeed { addr: String },

    /// Seed resolution failed persistently.
    #[error("resolving seed peer '{addr}': {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The transport failed to come up.
    #[error(transparent)]
    Transport(#[from] GossipError),
}
