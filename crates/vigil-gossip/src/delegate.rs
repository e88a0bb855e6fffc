//! Application seams of the transport.
//!
//! The transport never interprets application payloads; everything it
//! carries on behalf of the application flows through these two traits.
//! All methods are called synchronously from the transport's background
//! tasks and must return quickly without blocking on I/O.

use bytes::Bytes;

use crate::member::Member;

/// Hooks for application state carried over the transport.
pub trait Delegate: Send + Sync + 'static {
    /// Opaque metadata attached to the local node's alive announcements.
    /// Must not exceed `limit` bytes; longer blobs are truncated.
    fn node_meta(&self, limit: usize) -> Bytes;

    /// Serializes the full local application state for a push/pull
    /// exchange. `join` is true when the exchange bootstraps a new node.
    fn local_state(&self, join: bool) -> Bytes;

    /// Merges a remote node's `local_state` blob into the local state.
    /// Malformed input must be handled internally; the transport ignores
    /// the outcome.
    fn merge_remote_state(&self, buf: &[u8], join: bool);

    /// Delivers a single application broadcast received from the network.
    fn notify_msg(&self, msg: &[u8]);

    /// Returns queued application broadcasts. Each returned payload costs
    /// `overhead` bytes of framing; the sum of payloads plus overhead must
    /// stay within `limit`.
    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Bytes>;
}

/// Hooks for membership transitions.
pub trait EventDelegate: Send + Sync + 'static {
    /// A node became alive: first contact or revival after failure.
    fn notify_join(&self, member: &Member);

    /// A node is gone: confirmed dead or gracefully departed.
    fn notify_leave(&self, member: &Member);

    /// An alive node's descriptor (address or metadata) was refreshed.
    fn notify_update(&self, member: &Member);
}
