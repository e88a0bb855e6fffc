//! Test helpers for spawning in-process vigil peers on loopback.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vigil_cluster::{ClusterConfig, Peer, State};

/// Starts a peer on a random loopback port with intervals tightened for
/// tests.
pub async fn spawn_peer(seeds: Vec<String>) -> Arc<Peer> {
    init_tracing();
    Peer::join(ClusterConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        seeds,
        wait_if_empty: true,
        gossip_interval: Duration::from_millis(100),
        push_pull_interval: Duration::from_millis(500),
        tcp_timeout: Duration::from_secs(2),
        reconnect_interval: Duration::from_millis(500),
        ..ClusterConfig::default()
    })
    .await
    .expect("peer should come up on a free local port")
}

/// Runs the settle barrier to completion with a zero poll interval.
pub async fn settle_now(peer: &Arc<Peer>) {
    let settling = Arc::clone(peer);
    tokio::spawn(async move {
        settling
            .settle(CancellationToken::new(), Duration::ZERO)
            .await;
    });
    peer.wait_ready().await;
}

/// Polls `condition` until it holds or ten seconds elapse.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Grow-only byte-set state: merge inserts every byte, marshal emits the
/// sorted set. Commutative and associative, like the states the cluster
/// layer is built for.
#[derive(Default)]
pub struct SetState {
    entries: Mutex<BTreeSet<u8>>,
}

impl SetState {
    pub fn insert(&self, b: u8) {
        self.entries.lock().unwrap().insert(b);
    }

    pub fn contains(&self, b: u8) -> bool {
        self.entries.lock().unwrap().contains(&b)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl State for SetState {
    fn marshal_binary(&self) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.entries.lock().unwrap().iter().copied().collect())
    }

    fn merge(&self, data: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut entries = self.entries.lock().unwrap();
        for b in data {
            entries.insert(*b);
        }
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "error".into()),
        )
        .try_init();
}
