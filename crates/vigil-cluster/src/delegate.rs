//! Bridge between the transport's callbacks and the cluster layer.
//!
//! One object implements both transport seams: application state flows
//! through [`Delegate`] (push/pull snapshots, broadcast arrival and
//! sourcing), membership events flow through [`EventDelegate`] into the
//! peer bookkeeping. A malformed message is logged and dropped; one bad
//! payload never corrupts local state. Parts with unregistered keys are
//! silently discarded so that mixed-version clusters can gossip states
//! this instance does not know yet.

use std::sync::Arc;

use bytes::Bytes;

use tracing::{debug, warn};
use vigil_gossip::{Delegate, EventDelegate, Member, TransmitQueue};

use crate::part::{decode_parts, encode_parts, Part};
use crate::peer::PeerBook;
use crate::state::StateRegistry;

pub(crate) struct ClusterDelegate {
    states: Arc<StateRegistry>,
    book: Arc<PeerBook>,
    bcast: Arc<TransmitQueue>,
}

impl ClusterDelegate {
    pub(crate) fn new(
        states: Arc<StateRegistry>,
        book: Arc<PeerBook>,
        bcast: Arc<TransmitQueue>,
    ) -> Self {
        Self {
            states,
            book,
            bcast,
        }
    }

    fn dispatch(&self, part: Part) {
        match self.states.get(&part.key) {
            Some(state) => {
                if let Err(e) = state.merge(&part.data) {
                    warn!("merging remote data for state {} failed: {}", part.key, e);
                }
            }
            None => debug!("dropping part with unknown state key {}", part.key),
        }
    }

    fn refresh_cluster_size(&self) {
        // feeds the transmit queue's retransmit scaling; +1 for ourselves
        self.bcast.set_cluster_size(self.book.alive_len() + 1);
    }
}

impl Delegate for ClusterDelegate {
    fn node_meta(&self, _limit: usize) -> Bytes {
        Bytes::new()
    }

    fn local_state(&self, _join: bool) -> Bytes {
        encode_parts(&self.states.snapshot_parts())
    }

    fn merge_remote_state(&self, buf: &[u8], _join: bool) {
        let parts = match decode_parts(buf) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("decoding remote state snapshot failed: {}", e);
                return;
            }
        };
        for part in parts {
            self.dispatch(part);
        }
    }

    fn notify_msg(&self, msg: &[u8]) {
        match Part::decode(&mut &msg[..]) {
            Ok(part) => self.dispatch(part),
            Err(e) => warn!("decoding broadcast failed: {}", e),
        }
    }

    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Bytes> {
        self.bcast.get_broadcasts(overhead, limit)
    }
}

impl EventDelegate for ClusterDelegate {
    fn notify_join(&self, member: &Member) {
        self.book.peer_join(member);
        self.refresh_cluster_size();
    }

    fn notify_leave(&self, member: &Member) {
        self.book.peer_leave(member);
        self.refresh_cluster_size();
    }

    fn notify_update(&self, member: &Member) {
        self.book.peer_update(member);
    }
}
