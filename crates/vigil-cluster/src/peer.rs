//! The local cluster peer: bookkeeping, reconnection, eviction, settling.
//!
//! A [`Peer`] wraps the gossip transport with the bookkeeping the
//! notification service needs: which peers are alive, which have failed
//! and since when, and whether the local view has settled enough to start
//! acting on shared state. Failed peers are re-dialed periodically (the
//! transport gives up on dead nodes by itself) and forgotten once they
//! have been gone longer than the reconnect timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_gossip::{GossipConfig, Gossiper, Member, TransmitQueue};

use crate::channel::Channel;
use crate::config::ClusterConfig;
use crate::delegate::ClusterDelegate;
use crate::error::ClusterError;
use crate::resolve::{has_nonlocal, is_unroutable, resolve_peers, DnsResolver};
use crate::state::{State, StateRegistry};

/// Cadence of the eviction sweep. Independent of the reconnect interval;
/// evictions are rare.
const EVICTION_TICK: Duration = Duration::from_secs(5 * 60);

/// Consecutive equal membership polls required before settling.
const REQUIRED_STABLE_POLLS: usize = 3;

/// Status of a remote peer in the local bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Alive,
    Failed,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerStatus::Alive => write!(f, "alive"),
            PeerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Bookkeeping record for one remote peer.
#[derive(Debug, Clone)]
pub(crate) struct TrackedPeer {
    pub(crate) status: PeerStatus,
    /// Set while the peer is failed; cleared on rejoin.
    pub(crate) leave_time: Option<SystemTime>,
    pub(crate) member: Member,
}

#[derive(Default)]
struct BookInner {
    /// Every peer ever reported by the transport plus pre-populated
    /// seeds, keyed by "ip:port".
    peers: HashMap<String, TrackedPeer>,
    /// Failed peers in insertion order. Each entry mirrors a `Failed`
    /// record in `peers`.
    failed: Vec<TrackedPeer>,
}

/// Peer table and failed list under one lock.
///
/// Shared between the delegate (transport callbacks) and the peer's
/// background loops. Writers never hold the lock across I/O.
#[derive(Default)]
pub(crate) struct PeerBook {
    inner: RwLock<BookInner>,
}

impl PeerBook {
    /// A peer became alive: first contact or rejoin after failure.
    ///
    /// The join counter counts events, not distinct peers; refreshes of
    /// already-alive peers increment it too.
    pub(crate) fn peer_join(&self, member: &Member) {
        let mut inner = self.inner.write().expect("peer book poisoned");
        let addr = member.address();

        let old_status = match inner.peers.get_mut(&addr) {
            Some(tracked) => {
                let old = tracked.status;
                tracked.member = member.clone();
                tracked.status = PeerStatus::Alive;
                tracked.leave_time = None;
                Some(old)
            }
            None => {
                inner.peers.insert(
                    addr.clone(),
                    TrackedPeer {
                        status: PeerStatus::Alive,
                        leave_time: None,
                        member: member.clone(),
                    },
                );
                None
            }
        };

        counter!("cluster_peers_joined_total").increment(1);

        if old_status == Some(PeerStatus::Failed) {
            debug!("peer {} rejoined", member);
            inner.failed.retain(|p| p.member.address() != addr);
            gauge!("cluster_failed_peers").set(inner.failed.len() as f64);
        }
    }

    /// A peer is gone. Unknown addresses are ignored: a leave for a peer
    /// we never saw is a gossip anomaly, not an error.
    pub(crate) fn peer_leave(&self, member: &Member) {
        let mut inner = self.inner.write().expect("peer book poisoned");
        let addr = member.address();

        let snapshot = match inner.peers.get_mut(&addr) {
            Some(tracked) => {
                tracked.status = PeerStatus::Failed;
                tracked.leave_time = Some(SystemTime::now());
                tracked.member = member.clone();
                tracked.clone()
            }
            None => return,
        };
        inner.failed.push(snapshot);

        counter!("cluster_peers_left_total").increment(1);
        gauge!("cluster_failed_peers").set(inner.failed.len() as f64);
        debug!("peer {} left", member);
    }

    /// A peer's descriptor was refreshed. Unknown addresses are ignored.
    pub(crate) fn peer_update(&self, member: &Member) {
        let mut inner = self.inner.write().expect("peer book poisoned");
        match inner.peers.get_mut(&member.address()) {
            Some(tracked) => tracked.member = member.clone(),
            None => return,
        }

        counter!("cluster_peers_update_total").increment(1);
        debug!("peer {} updated", member);
    }

    /// Pre-populates resolved seeds as failed peers so the reconnect loop
    /// dials them immediately, even when the initial transport join races
    /// the first gossip. Rejoining moves them out in `peer_join`.
    pub(crate) fn set_initial_failed(&self, peers: &[String]) {
        if peers.is_empty() {
            return;
        }

        let now = SystemTime::now();
        let mut inner = self.inner.write().expect("peer book poisoned");
        for peer_addr in peers {
            let addr: SocketAddr = match peer_addr.parse() {
                Ok(addr) => addr,
                Err(_) => continue,
            };

            let tracked = TrackedPeer {
                status: PeerStatus::Failed,
                leave_time: Some(now),
                member: Member::new("", addr),
            };
            inner.failed.push(tracked.clone());
            inner.peers.insert(tracked.member.address(), tracked);
        }
        gauge!("cluster_failed_peers").set(inner.failed.len() as f64);
    }

    /// Drops failed peers whose failure is older than `timeout` from both
    /// the failed list and the peer table; survivors keep their insertion
    /// order.
    pub(crate) fn remove_failed_peers(&self, timeout: Duration) {
        let mut inner = self.inner.write().expect("peer book poisoned");
        let now = SystemTime::now();

        let BookInner { peers, failed } = &mut *inner;
        let mut keep = Vec::with_capacity(failed.len());
        for tracked in std::mem::take(failed) {
            let fresh = tracked
                .leave_time
                .and_then(|t| t.checked_add(timeout))
                .map(|deadline| deadline > now)
                .unwrap_or(true);
            if fresh {
                keep.push(tracked);
            } else {
                debug!("failed peer {} has timed out", tracked.member);
                peers.remove(&tracked.member.address());
            }
        }
        *failed = keep;

        gauge!("cluster_failed_peers").set(inner.failed.len() as f64);
    }

    /// Copy of the failed list, taken under the read lock so callers can
    /// do I/O without holding it.
    pub(crate) fn failed_snapshot(&self) -> Vec<TrackedPeer> {
        self.inner
            .read()
            .expect("peer book poisoned")
            .failed
            .clone()
    }

    pub(crate) fn failed_len(&self) -> usize {
        self.inner.read().expect("peer book poisoned").failed.len()
    }

    /// Number of peers currently tracked as alive.
    pub(crate) fn alive_len(&self) -> usize {
        self.inner
            .read()
            .expect("peer book poisoned")
            .peers
            .values()
            .filter(|p| p.status == PeerStatus::Alive)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self, addr: &str) -> Option<TrackedPeer> {
        self.inner
            .read()
            .expect("peer book poisoned")
            .peers
            .get(addr)
            .cloned()
    }
}

/// A member of the vigil cluster.
///
/// Created by [`Peer::join`]; lives until [`Peer::leave`]. All background
/// work (transport ticks, reconnection, eviction, settling) runs on tokio
/// tasks tied to the peer's stop token.
pub struct Peer {
    gossip: Arc<Gossiper>,
    book: Arc<PeerBook>,
    states: Arc<StateRegistry>,
    bcast: Arc<TransmitQueue>,
    stop: CancellationToken,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl Peer {
    /// Creates the local peer and joins the cluster.
    ///
    /// Misconfiguration (unparseable addresses, persistently failing seed
    /// resolution) is fatal. An unreachable cluster is not: the peer
    /// comes up anyway and the reconnect loop keeps dialing the seeds,
    /// which are pre-populated as failed for exactly that purpose.
    pub async fn join(config: ClusterConfig) -> Result<Arc<Peer>, ClusterError> {
        let bind: SocketAddr =
            config
                .bind_addr
                .parse()
                .map_err(|e: std::net::AddrParseError| ClusterError::InvalidBindAddr {
                    addr: config.bind_addr.clone(),
                    reason: e.to_string(),
                })?;
        let advertise: Option<SocketAddr> = match &config.advertise_addr {
            Some(addr) => Some(addr.parse().map_err(|e: std::net::AddrParseError| {
                ClusterError::InvalidAdvertiseAddr {
                    addr: addr.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        // Sortable, monotonic-ish identity assigned at join time; peers()
        // ordering and position() build on it.
        let name = Uuid::now_v7().to_string();

        let stop = CancellationToken::new();
        let my_address = advertise.unwrap_or(bind).to_string();
        let resolved = resolve_peers(
            &DnsResolver,
            &config.seeds,
            &my_address,
            config.wait_if_empty,
            &stop,
        )
        .await?;
        debug!("resolved seed peers: {}", resolved.join(","));

        if has_nonlocal(&resolved) && is_unroutable(&my_address) {
            warn!(
                "this node advertises itself on an unroutable address {} and will be unreachable in the cluster; configure a routable advertise address",
                my_address
            );
        }

        let states = Arc::new(StateRegistry::default());
        let book = Arc::new(PeerBook::default());
        let gossip_config = GossipConfig {
            node_name: name,
            bind_addr: config.bind_addr.clone(),
            advertise_addr: advertise,
            gossip_interval: config.gossip_interval,
            push_pull_interval: config.push_pull_interval,
            tcp_timeout: config.tcp_timeout,
            probe_interval: config.probe_interval,
            probe_timeout: config.probe_timeout,
            ..GossipConfig::default()
        };
        let bcast = Arc::new(TransmitQueue::new(gossip_config.retransmit_mult));
        let delegate = Arc::new(ClusterDelegate::new(
            Arc::clone(&states),
            Arc::clone(&book),
            Arc::clone(&bcast),
        ));

        let gossip = Gossiper::start(gossip_config, delegate.clone(), delegate).await?;

        book.set_initial_failed(&resolved);

        match gossip.join(&resolved).await {
            Ok(n) => debug!("joined cluster, contacted {} seed peers", n),
            Err(e) => warn!("failed to join cluster: {}", e),
        }

        let (ready_tx, ready_rx) = watch::channel(false);
        let peer = Arc::new(Peer {
            gossip,
            book,
            states,
            bcast,
            stop,
            ready_tx,
            ready_rx,
        });

        if !config.reconnect_interval.is_zero() {
            peer.spawn_reconnect_loop(config.reconnect_interval);
        }
        if !config.reconnect_timeout.is_zero() {
            peer.spawn_eviction_loop(EVICTION_TICK, config.reconnect_timeout);
        }

        Ok(peer)
    }

    /// Registers a replicated state under `key`, overwriting any prior
    /// registration, and returns the broadcast channel for it.
    ///
    /// Register all states before [`settle`](Peer::settle) completes;
    /// merges for keys registered after the ready gate opens are not
    /// guaranteed.
    pub fn add_state(&self, key: impl Into<String>, state: Arc<dyn State>) -> Channel {
        let key = key.into();
        self.states.register(key.clone(), state);
        Channel::new(key, Arc::clone(&self.bcast))
    }

    /// Leaves the cluster, waiting up to `timeout` for the farewell to go
    /// out. Stops all background loops; idempotent.
    pub async fn leave(&self, timeout: Duration) -> Result<(), ClusterError> {
        if self.stop.is_cancelled() {
            return Ok(());
        }
        self.stop.cancel();
        debug!("leaving cluster");
        self.gossip.leave(timeout).await?;
        Ok(())
    }

    /// The unique name of this peer in the cluster.
    pub fn name(&self) -> String {
        self.gossip.local_member().name
    }

    /// Number of currently alive members, the local peer included.
    pub async fn cluster_size(&self) -> usize {
        self.gossip.num_members().await
    }

    /// The local peer's own membership descriptor.
    pub fn self_member(&self) -> Member {
        self.gossip.local_member()
    }

    /// All currently alive members, the local peer included.
    pub async fn peers(&self) -> Vec<Member> {
        let mut members = self.gossip.members().await;
        members.push(self.gossip.local_member());
        members
    }

    /// Stable position of this peer within the membership: the index of
    /// the local name in the lexicographic order of all member names.
    /// Callers use it for deterministic work sharding.
    pub async fn position(&self) -> usize {
        let mut names: Vec<String> = self.peers().await.into_iter().map(|m| m.name).collect();
        names.sort();

        let own = self.name();
        names.iter().position(|n| *n == own).unwrap_or(0)
    }

    /// Whether the settle barrier has opened the ready gate.
    pub fn ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Waits until the ready gate opens. Returns immediately if it
    /// already has.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// "settling" until the ready gate opens, then "ready".
    pub fn status(&self) -> &'static str {
        if self.ready() {
            "ready"
        } else {
            "settling"
        }
    }

    /// Debug snapshot of the local view.
    pub async fn info(&self) -> serde_json::Value {
        let member_json = |m: &Member| {
            serde_json::json!({
                "name": m.name,
                "address": m.address(),
            })
        };
        let members: Vec<_> = self.peers().await.iter().map(member_json).collect();
        serde_json::json!({
            "self": member_json(&self.self_member()),
            "members": members,
        })
    }

    /// Waits until the membership count stops churning, then opens the
    /// ready gate.
    ///
    /// The gate opens once the count has been equal across
    /// [`REQUIRED_STABLE_POLLS`] consecutive polls, or immediately when
    /// `ctx` is cancelled. This is a heuristic, not consensus: its only
    /// purpose is to avoid acting on shared state (notifying, expiring
    /// silences) before most peers are likely known. Runs once per peer
    /// lifetime, typically on its own task.
    pub async fn settle(&self, ctx: CancellationToken, interval: Duration) {
        info!("waiting for gossip to settle, polling every {:?}", interval);
        let start = Instant::now();
        let mut n_peers = 0usize;
        let mut n_okay = 0usize;
        let mut total_polls = 0usize;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        "gossip not settled after {} polls and {:?} but continuing anyway",
                        total_polls,
                        start.elapsed()
                    );
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let n = self.cluster_size().await;
            if n_okay >= REQUIRED_STABLE_POLLS {
                info!("gossip settled after {:?}; proceeding", start.elapsed());
                break;
            }
            if n == n_peers {
                n_okay += 1;
                debug!("gossip looks settled, {} stable polls", n_okay);
            } else {
                n_okay = 0;
                info!(
                    "gossip not settled, members changed {} -> {} after {:?}",
                    n_peers,
                    n,
                    start.elapsed()
                );
            }
            n_peers = n;
            total_polls += 1;
        }
        // one-shot: once open, never closes
        let _ = self.ready_tx.send(true);
    }

    /// Re-dials every failed peer once. Bookkeeping stays off this path:
    /// a successful dial announces itself through the join event, which
    /// is the only writer that clears failed records.
    pub(crate) async fn reconnect(&self) {
        let failed = self.book.failed_snapshot();
        for tracked in failed {
            let addr = tracked.member.address();
            match self.gossip.join(std::slice::from_ref(&addr)).await {
                Ok(_) => {
                    counter!("cluster_reconnections_total").increment(1);
                    debug!("reconnected to {}", addr);
                }
                Err(e) => {
                    counter!("cluster_reconnections_failed_total").increment(1);
                    debug!("reconnect to {} failed: {}", addr, e);
                }
            }
        }
    }

    fn spawn_reconnect_loop(self: &Arc<Self>, every: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = this.stop.cancelled() => return,
                    _ = tick.tick() => this.reconnect().await,
                }
            }
        });
    }

    fn spawn_eviction_loop(self: &Arc<Self>, every: Duration, timeout: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = this.stop.cancelled() => return,
                    _ = tick.tick() => this.book.remove_failed_peers(timeout),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testutil::SetState;

    async fn test_peer() -> Arc<Peer> {
        Peer::join(ClusterConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            wait_if_empty: true,
            ..ClusterConfig::default()
        })
        .await
        .expect("peer should come up on a free local port")
    }

    /// Polls `condition` until it holds or a few seconds elapse.
    async fn eventually<F, Fut>(what: &str, mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    fn member(name: &str, addr: &str) -> Member {
        Member::new(name, addr.parse().unwrap())
    }

    #[tokio::test]
    async fn settles_with_zero_interval() {
        let peer = test_peer().await;
        assert!(!peer.ready());
        assert_eq!(peer.status(), "settling");

        let settling = Arc::clone(&peer);
        tokio::spawn(async move {
            settling
                .settle(CancellationToken::new(), Duration::ZERO)
                .await;
        });
        peer.wait_ready().await;
        assert_eq!(peer.status(), "ready");
    }

    #[tokio::test]
    async fn settle_cancel_opens_the_gate() {
        let peer = test_peer().await;
        let ctx = CancellationToken::new();
        ctx.cancel();

        peer.settle(ctx, Duration::from_secs(3600)).await;
        assert!(peer.ready());
    }

    #[tokio::test]
    async fn ready_gate_stays_open() {
        let peer = test_peer().await;
        peer.settle(CancellationToken::new(), Duration::ZERO).await;
        assert!(peer.ready());
        // a second settle run must not close it again
        let ctx = CancellationToken::new();
        ctx.cancel();
        peer.settle(ctx, Duration::from_secs(3600)).await;
        assert!(peer.ready());
    }

    #[tokio::test]
    async fn join_then_leave_moves_peer_to_failed() {
        let p1 = test_peer().await;
        let settling = Arc::clone(&p1);
        tokio::spawn(async move {
            settling
                .settle(CancellationToken::new(), Duration::ZERO)
                .await;
        });
        p1.wait_ready().await;
        assert_eq!(p1.status(), "ready");

        let p2 = Peer::join(ClusterConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            seeds: vec![p1.self_member().address()],
            wait_if_empty: true,
            ..ClusterConfig::default()
        })
        .await
        .unwrap();

        eventually("p1 sees a cluster of two", || {
            let p1 = Arc::clone(&p1);
            async move { p1.cluster_size().await == 2 }
        })
        .await;

        p2.leave(Duration::ZERO).await.unwrap();

        eventually("p1 records p2 as failed", || {
            let p1 = Arc::clone(&p1);
            async move { p1.cluster_size().await == 1 && p1.book.failed_len() == 1 }
        })
        .await;

        let failed = p1.book.failed_snapshot();
        assert_eq!(failed[0].member.name, p2.name());
        let tracked = p1.book.tracked(&p2.self_member().address()).unwrap();
        assert_eq!(tracked.member.address(), p2.self_member().address());
        assert_eq!(tracked.status, PeerStatus::Failed);
    }

    #[tokio::test]
    async fn reconnect_restores_a_failed_peer() {
        let p1 = test_peer().await;
        let p2 = test_peer().await;

        // synthesize p2 failing from p1's point of view
        let p2_member = p2.self_member();
        p1.book.peer_join(&p2_member);
        p1.book.peer_leave(&p2_member);

        assert_eq!(p1.cluster_size().await, 1);
        assert_eq!(p1.book.failed_len(), 1);

        p1.reconnect().await;

        assert_eq!(p1.cluster_size().await, 2);
        assert_eq!(p1.book.failed_len(), 0);
        let tracked = p1.book.tracked(&p2_member.address()).unwrap();
        assert_eq!(tracked.status, PeerStatus::Alive);
    }

    #[tokio::test]
    async fn remove_failed_peers_keeps_recent_failures() {
        let book = PeerBook::default();
        let now = SystemTime::now();

        let seed = |addr: &str, leave_time: SystemTime| {
            let tracked = TrackedPeer {
                status: PeerStatus::Failed,
                leave_time: Some(leave_time),
                member: member("", addr),
            };
            let mut inner = book.inner.write().unwrap();
            inner.failed.push(tracked.clone());
            inner.peers.insert(tracked.member.address(), tracked);
        };
        seed("1.2.3.4:5000", now);
        seed("2.3.4.5:5000", now - Duration::from_secs(3600));
        seed("3.4.5.6:5000", now - Duration::from_secs(1800));

        book.remove_failed_peers(Duration::from_secs(1800));

        let failed = book.failed_snapshot();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].member.address(), "1.2.3.4:5000");
        // expired records are gone from the peer table too
        assert!(book.tracked("2.3.4.5:5000").is_none());
        assert!(book.tracked("3.4.5.6:5000").is_none());
        assert!(book.tracked("1.2.3.4:5000").is_some());
    }

    #[tokio::test]
    async fn initial_failed_prepopulates_both_structures() {
        let book = PeerBook::default();
        let addrs = [
            "1.2.3.4:5000".to_string(),
            "2.3.4.5:5000".to_string(),
            "3.4.5.6:5000".to_string(),
        ];

        book.set_initial_failed(&addrs);

        assert_eq!(book.failed_len(), 3);
        for addr in &addrs {
            let tracked = book.tracked(addr).expect("seed must be in the peer table");
            assert_eq!(tracked.status, PeerStatus::Failed);
            assert!(tracked.leave_time.is_some());
        }
    }

    #[tokio::test]
    async fn unparseable_seeds_are_skipped() {
        let book = PeerBook::default();
        book.set_initial_failed(&["not-an-address".to_string(), "1.2.3.4:5000".to_string()]);
        assert_eq!(book.failed_len(), 1);
    }

    #[tokio::test]
    async fn double_join_is_idempotent_for_the_table() {
        let book = PeerBook::default();
        let m = member("n1", "10.0.0.1:9094");

        book.peer_join(&m);
        book.peer_join(&m);

        assert_eq!(book.alive_len(), 1);
        assert_eq!(book.failed_len(), 0);
        assert_eq!(
            book.tracked(&m.address()).unwrap().status,
            PeerStatus::Alive
        );
    }

    #[tokio::test]
    async fn leave_then_join_restores_alive() {
        let book = PeerBook::default();
        let m = member("n1", "10.0.0.1:9094");

        book.peer_join(&m);
        book.peer_leave(&m);
        assert_eq!(book.failed_len(), 1);
        let tracked = book.tracked(&m.address()).unwrap();
        assert_eq!(tracked.status, PeerStatus::Failed);
        assert!(tracked.leave_time.is_some());

        book.peer_join(&m);
        assert_eq!(book.failed_len(), 0);
        let tracked = book.tracked(&m.address()).unwrap();
        assert_eq!(tracked.status, PeerStatus::Alive);
        assert!(tracked.leave_time.is_none());
    }

    #[tokio::test]
    async fn failed_list_mirrors_peer_table() {
        let book = PeerBook::default();
        let m1 = member("n1", "10.0.0.1:9094");
        let m2 = member("n2", "10.0.0.2:9094");

        book.peer_join(&m1);
        book.peer_join(&m2);
        book.peer_leave(&m1);
        book.peer_leave(&m2);
        book.peer_join(&m1);

        // every failed record has a matching Failed entry in the table,
        // and no address appears twice
        let failed = book.failed_snapshot();
        assert_eq!(failed.len(), 1);
        let mut addrs: Vec<_> = failed.iter().map(|p| p.member.address()).collect();
        addrs.dedup();
        assert_eq!(addrs.len(), failed.len());
        for record in &failed {
            let tracked = book.tracked(&record.member.address()).unwrap();
            assert_eq!(tracked.status, PeerStatus::Failed);
        }
    }

    #[tokio::test]
    async fn leave_and_update_for_unknown_peers_are_ignored() {
        let book = PeerBook::default();
        let m = member("ghost", "10.9.9.9:9094");

        book.peer_leave(&m);
        book.peer_update(&m);

        assert_eq!(book.failed_len(), 0);
        assert!(book.tracked(&m.address()).is_none());
    }

    #[tokio::test]
    async fn add_state_returns_a_working_channel() {
        let peer = test_peer().await;
        let state = Arc::new(SetState::default());
        let channel = peer.add_state("sil", state);

        channel.broadcast(bytes::Bytes::from_static(b"payload"));
        assert_eq!(peer.bcast.len(), 1);
    }

    #[tokio::test]
    async fn info_reports_self_and_members() {
        let peer = test_peer().await;
        let info = peer.info().await;
        assert_eq!(info["self"]["name"], peer.name());
        assert!(!info["members"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_bind_addr_is_fatal() {
        let result = Peer::join(ClusterConfig {
            bind_addr: "not-an-address".to_string(),
            ..ClusterConfig::default()
        })
        .await;
        assert!(matches!(result, Err(ClusterError::InvalidBindAddr { .. })));
    }

    #[tokio::test]
    async fn invalid_advertise_addr_is_fatal() {
        let result = Peer::join(ClusterConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            advertise_addr: Some("bogus".to_string()),
            ..ClusterConfig::default()
        })
        .await;
        assert!(matches!(
            result,
            Err(ClusterError::InvalidAdvertiseAddr { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_seeds_are_not_fatal() {
        // 203.0.113.0/24 is TEST-NET; nothing answers there. The join
        // itself must still succeed and the seed must sit in the failed
        // list for the reconnect loop.
        let peer = Peer::join(ClusterConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            seeds: vec!["203.0.113.10:9094".to_string()],
            tcp_timeout: Duration::from_millis(200),
            ..ClusterConfig::default()
        })
        .await
        .expect("unreachable seeds must not fail join");

        assert_eq!(peer.book.failed_len(), 1);
        assert_eq!(peer.cluster_size().await, 1);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let peer = test_peer().await;
        peer.leave(Duration::ZERO).await.unwrap();
        peer.leave(Duration::ZERO).await.unwrap();
    }
}
