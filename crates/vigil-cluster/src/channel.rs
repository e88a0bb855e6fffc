//! Best-effort broadcast channel for one state key.

use std::sync::Arc;

use bytes::Bytes;

use vigil_gossip::{Broadcast, TransmitQueue};

use crate::part::Part;

/// Fire-and-forget broadcast handle bound to one state key.
///
/// Returned by [`Peer::add_state`](crate::Peer::add_state). There is no
/// delivery guarantee at this layer; durability and idempotence are
/// properties of the [`State`](crate::State) merging the payload on the
/// receiving side.
#[derive(Clone)]
pub struct Channel {
    key: String,
    bcast: Arc<TransmitQueue>,
}

impl Channel {
    pub(crate) fn new(key: String, bcast: Arc<TransmitQueue>) -> Self {
        Self { key, bcast }
    }

    /// Enqueues `data` for cluster-wide dissemination under this channel's
    /// key.
    pub fn broadcast(&self, data: impl Into<Bytes>) {
        let part = Part::new(self.key.clone(), data.into());
        self.bcast.queue_broadcast(PartBroadcast(part.encode()));
    }
}

/// Broadcasts never supersede each other at this layer; conflict
/// resolution belongs to the receiving state's merge.
struct PartBroadcast(Bytes);

impl Broadcast for PartBroadcast {
    fn message(&self) -> Bytes {
        self.0.clone()
    }

    fn invalidates(&self, _other: &dyn Broadcast) -> bool {
        false
    }

    fn finished(&self) {}
}
