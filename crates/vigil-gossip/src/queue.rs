//! Transmit-limited broadcast queue.
//!
//! Application broadcasts are piggybacked on gossip datagrams and retired
//! after a bounded number of transmissions that scales logarithmically with
//! cluster size. The queue is strictly best-effort: it never reports
//! overflow or delivery, and dropped items are simply gone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

/// An item queued for cluster-wide dissemination.
pub trait Broadcast: Send + Sync + 'static {
    /// The encoded payload to put on the wire.
    fn message(&self) -> Bytes;

    /// Whether this broadcast supersedes `other`. When true, `other` is
    /// dropped from the queue at enqueue time.
    fn invalidates(&self, other: &dyn Broadcast) -> bool;

    /// Called when the queue retires the item, either because it reached
    /// its transmit budget or because a newer broadcast invalidated it.
    fn finished(&self);
}

struct QueuedBroadcast {
    item: Box<dyn Broadcast>,
    transmits: usize,
}

/// Best-effort broadcast queue with a per-item transmit budget of
/// `retransmit_mult * (log2(cluster_size + 1) + 1)`.
pub struct TransmitQueue {
    retransmit_mult: usize,
    cluster_size: AtomicUsize,
    queue: Mutex<VecDeque<QueuedBroadcast>>,
}

impl TransmitQueue {
    pub fn new(retransmit_mult: usize) -> Self {
        Self {
            retransmit_mult,
            cluster_size: AtomicUsize::new(1),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Updates the cluster-size estimate that scales the transmit budget.
    pub fn set_cluster_size(&self, n: usize) {
        self.cluster_size.store(n.max(1), Ordering::Relaxed);
    }

    /// Enqueues a broadcast, retiring any queued item it invalidates.
    pub fn queue_broadcast(&self, b: impl Broadcast) {
        self.queue_boxed(Box::new(b));
    }

    fn queue_boxed(&self, b: Box<dyn Broadcast>) {
        let mut queue = self.queue.lock().expect("broadcast queue poisoned");
        queue.retain(|queued| {
            if b.invalidates(queued.item.as_ref()) {
                queued.item.finished();
                false
            } else {
                true
            }
        });
        queue.push_back(QueuedBroadcast {
            item: b,
            transmits: 0,
        });
    }

    /// Pops payloads for one gossip round.
    ///
    /// Each payload costs `overhead` bytes of framing on top of its own
    /// length; selection stops when `limit` would be exceeded. Selected
    /// items have their transmit count bumped and are retired once they
    /// exhaust their budget.
    pub fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Bytes> {
        let budget = self.transmit_budget();
        let mut queue = self.queue.lock().expect("broadcast queue poisoned");

        let mut used = 0usize;
        let mut out = Vec::new();
        let mut kept = VecDeque::with_capacity(queue.len());

        // Oldest first: earlier broadcasts finish their budget sooner.
        while let Some(mut queued) = queue.pop_front() {
            let msg = queued.item.message();
            let cost = overhead + msg.len();
            if used + cost > limit {
                kept.push_back(queued);
                continue;
            }
            used += cost;
            out.push(msg);
            queued.transmits += 1;
            if queued.transmits >= budget {
                queued.item.finished();
            } else {
                kept.push_back(queued);
            }
        }

        *queue = kept;
        out
    }

    /// Number of broadcasts currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().expect("broadcast queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transmit_budget(&self) -> usize {
        let n = self.cluster_size.load(Ordering::Relaxed);
        let log2 = (usize::BITS - n.leading_zeros()) as usize;
        self.retransmit_mult * (log2 + 1)
    }
}
