//! Replicated state handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::part::Part;

/// A piece of state replicated across the cluster.
///
/// Implementations are shared between the application and the transport's
/// callback tasks, so both operations take `&self`; a typical
/// implementation wraps its data in a lock. `merge` must be commutative
/// and associative: the transport guarantees neither ordering nor
/// single delivery.
pub trait State: Send + Sync + 'static {
    /// Serializes the full current snapshot.
    fn marshal_binary(&self) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;

    /// Merges a serialized remote snapshot or broadcast into this state.
    fn merge(&self, data: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Keyed set of state handlers.
///
/// Registration is expected to finish before the peer settles; merges for
/// keys registered after the ready gate opens are not guaranteed.
#[derive(Default)]
pub(crate) struct StateRegistry {
    states: RwLock<HashMap<String, Arc<dyn State>>>,
}

impl StateRegistry {
    pub(crate) fn register(&self, key: String, state: Arc<dyn State>) {
        self.states
            .write()
            .expect("state registry poisoned")
            .insert(key, state);
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<dyn State>> {
        self.states
            .read()
            .expect("state registry poisoned")
            .get(key)
            .cloned()
    }

    /// Serializes every registered state into a Part-list snapshot.
    ///
    /// A state that fails to marshal is skipped; the rest of the snapshot
    /// still goes out.
    pub(crate) fn snapshot_parts(&self) -> Vec<Part> {
        let states = self.states.read().expect("state registry poisoned");
        let mut parts = Vec::with_capacity(states.len());
        for (key, state) in states.iter() {
            match state.marshal_binary() {
                Ok(data) => parts.push(Part::new(key.clone(), data)),
                Err(e) => warn!("marshaling state {} failed: {}", key, e),
            }
        }
        parts
    }
}
