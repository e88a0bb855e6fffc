//! SWIM membership engine.
//!
//! Sans-IO core of the failure detector. The engine consumes decoded
//! messages and clock ticks, mutates the member table, and returns the
//! datagrams to send; all socket work lives in the transport. Membership
//! transitions are reported synchronously through the [`EventDelegate`],
//! so delegate implementations must be quick and lock-light: they run
//! while the engine is locked.
//!
//! Each probe period:
//! 1. Pick a random active node and send it a Ping
//! 2. If no Ack within the probe timeout, ask k other nodes to PingReq it
//! 3. If still no Ack, mark the node Suspect and disseminate that
//! 4. After the suspicion timeout, mark it Dead
//! 5. Piggyback pending updates on every Ping/Ack/Gossip

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::prelude::IndexedRandom;
use tracing::{debug, trace, warn};

use crate::config::GossipConfig;
use crate::delegate::EventDelegate;
use crate::member::{Member, MemberStatus};
use crate::message::{MemberSnapshot, MemberUpdate, Message};

/// Maximum allowed incarnation value. Rejects updates with incarnation
/// numbers beyond this to prevent a malicious node from sending u64::MAX
/// and permanently disabling suspicion refutation.
const MAX_INCARNATION: u64 = u64::MAX / 2;

/// Maximum number of updates drained into one outgoing message.
const MAX_PIGGYBACK: usize = 32;

/// Internal state of a member as tracked by the failure detector.
#[derive(Debug, Clone)]
struct MemberState {
    member: Member,
    incarnation: u64,
    status: MemberStatus,
    status_change: Instant,
}

struct PendingProbe {
    target: String,
    sent_at: Instant,
    indirect: bool,
}

/// Tracks a PingReq relay in progress.
///
/// When we forward a Ping on behalf of another node (via PingReq), we
/// store this entry so we can relay the Ack back to the original
/// requester.
struct RelayEntry {
    requester: SocketAddr,
    original_seq: u64,
    sent_at: Instant,
}

/// The membership engine: SWIM probing, suspicion and dissemination.
pub struct Engine {
    local: Member,
    incarnation: u64,
    probe_interval: Duration,
    probe_timeout: Duration,
    suspicion_mult: u32,
    indirect_probes: usize,
    members: HashMap<String, MemberState>,
    pending_updates: Vec<MemberUpdate>,
    next_seq: u64,
    pending_probes: HashMap<u64, PendingProbe>,
    relay_pending: HashMap<u64, RelayEntry>,
    events: Arc<dyn EventDelegate>,
}

impl Engine {
    pub fn new(local: Member, config: &GossipConfig, events: Arc<dyn EventDelegate>) -> Self {
        Self {
            local,
            incarnation: 1,
            probe_interval: config.probe_interval,
            probe_timeout: config.probe_timeout,
            suspicion_mult: config.suspicion_mult,
            indirect_probes: config.indirect_probes,
            members: HashMap::new(),
            pending_updates: Vec::new(),
            next_seq: 1,
            pending_probes: HashMap::new(),
            relay_pending: HashMap::new(),
            events,
        }
    }

    /// The local node's descriptor.
    pub fn local(&self) -> &Member {
        &self.local
    }

    pub fn local_incarnation(&self) -> u64 {
        self.incarnation
    }

    /// All active (alive or suspect) members, the local node excluded.
    pub fn members(&self) -> Vec<Member> {
        self.members
            .values()
            .filter(|m| m.status.is_active())
            .map(|m| m.member.clone())
            .collect()
    }

    /// Number of active members including the local node.
    pub fn alive_count(&self) -> usize {
        1 + self
            .members
            .values()
            .filter(|m| m.status.is_active())
            .count()
    }

    /// Current status of a member, if known.
    pub fn member_status(&self, name: &str) -> Option<MemberStatus> {
        self.members.get(name).map(|m| m.status)
    }

    /// Membership half of a push/pull exchange: the local node plus every
    /// active member.
    pub fn snapshot(&self) -> Vec<MemberSnapshot> {
        let mut out = Vec::with_capacity(self.members.len() + 1);
        out.push(MemberSnapshot {
            name: self.local.name.clone(),
            addr: self.local.addr,
            incarnation: self.incarnation,
            meta: self.local.meta.clone(),
        });
        out.extend(
            self.members
                .values()
                .filter(|m| m.status.is_active())
                .map(|m| MemberSnapshot {
                    name: m.member.name.clone(),
                    addr: m.member.addr,
                    incarnation: m.incarnation,
                    meta: m.member.meta.clone(),
                }),
        );
        out
    }

    /// Merges the membership half of a remote push/pull exchange.
    ///
    /// Every entry is treated as an alive announcement. Unlike gossiped
    /// alive updates, a snapshot received over a direct TCP exchange
    /// revives dead members regardless of incarnation: the exchange is
    /// first-hand evidence the peer is back.
    pub fn merge_snapshot(&mut self, members: Vec<MemberSnapshot>) {
        for m in members {
            self.apply_alive(m.name, m.addr, m.incarnation, m.meta, true);
        }
    }

    /// Handles an incoming datagram.
    ///
    /// Returns the `(address, message)` pairs to send. Most messages
    /// produce a single reply back to `from`, but PingReq forwards a Ping
    /// to a different host, and relayed Acks route back to the original
    /// requester. Gossip payloads are not interpreted here; the transport
    /// hands them to the delegate.
    pub fn handle_message(&mut self, msg: Message, from: SocketAddr) -> Vec<(SocketAddr, Message)> {
        match msg {
            Message::Ping { seq, from: name, updates } => {
                trace!("received ping seq={} from {}", seq, name);
                self.apply_updates(updates);
                self.ensure_member(name, from);

                let response_updates = self.collect_updates();
                vec![(
                    from,
                    Message::Ack {
                        seq,
                        from: self.local.name.clone(),
                        updates: response_updates,
                    },
                )]
            }

            Message::PingReq {
                seq,
                from: name,
                target,
                target_addr,
            } => {
                trace!("received ping-req seq={} from {} for {}", seq, name, target);
                self.ensure_member(name, from);

                // forward a fresh Ping to the target on behalf of the requester
                let relay_seq = self.next_seq;
                self.next_seq += 1;

                self.relay_pending.insert(
                    relay_seq,
                    RelayEntry {
                        requester: from,
                        original_seq: seq,
                        sent_at: Instant::now(),
                    },
                );

                vec![(
                    target_addr,
                    Message::Ping {
                        seq: relay_seq,
                        from: self.local.name.clone(),
                        updates: vec![],
                    },
                )]
            }

            Message::Ack { seq, from: name, updates } => {
                trace!("received ack seq={} from {}", seq, name);
                self.apply_updates(updates);
                self.ensure_member(name, from);

                let mut outgoing = Vec::new();

                if let Some(probe) = self.pending_probes.remove(&seq) {
                    if self.members.get(&probe.target).map(|m| m.status)
                        == Some(MemberStatus::Suspect)
                    {
                        // Node recovered from suspicion
                        self.mark_alive(&probe.target);
                    }
                }

                // A relayed Ack is forwarded back to the original requester
                if let Some(relay) = self.relay_pending.remove(&seq) {
                    outgoing.push((
                        relay.requester,
                        Message::Ack {
                            seq: relay.original_seq,
                            from: self.local.name.clone(),
                            updates: vec![],
                        },
                    ));
                }

                outgoing
            }

            Message::Gossip { updates, .. } => {
                self.apply_updates(updates);
                vec![]
            }

            Message::PushPull { .. } => {
                debug!("push/pull message on the datagram path, dropping");
                vec![]
            }
        }
    }

    /// Runs one probe period.
    ///
    /// Returns all messages to send this tick: the direct probe plus any
    /// PingReq messages generated by timed-out direct probes.
    pub fn probe_tick(&mut self) -> Vec<(SocketAddr, Message)> {
        let mut outgoing = Vec::new();

        outgoing.extend(self.check_probe_timeouts());
        self.check_suspicion_timeouts();
        self.cleanup_stale_relays();

        let target = {
            let active: Vec<_> = self
                .members
                .values()
                .filter(|m| m.status.is_active())
                .map(|m| (m.member.name.clone(), m.member.addr))
                .collect();

            match active.choose(&mut rand::rng()) {
                Some(t) => t.clone(),
                None => return outgoing,
            }
        };

        let (target_name, target_addr) = target;
        let seq = self.next_seq;
        self.next_seq += 1;

        let updates = self.collect_updates();
        self.pending_probes.insert(
            seq,
            PendingProbe {
                target: target_name,
                sent_at: Instant::now(),
                indirect: false,
            },
        );

        outgoing.push((
            target_addr,
            Message::Ping {
                seq,
                from: self.local.name.clone(),
                updates,
            },
        ));
        outgoing
    }

    /// Drains one gossip round: up to `fanout` random active targets and
    /// the pending updates to send them. With no targets the updates stay
    /// queued.
    pub fn gossip_round(&mut self, fanout: usize) -> (Vec<SocketAddr>, Vec<MemberUpdate>) {
        let active: Vec<SocketAddr> = self
            .members
            .values()
            .filter(|m| m.status.is_active())
            .map(|m| m.member.addr)
            .collect();

        if active.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let k = fanout.min(active.len());
        let targets: Vec<SocketAddr> = active
            .choose_multiple(&mut rand::rng(), k)
            .copied()
            .collect();

        (targets, self.collect_updates())
    }

    /// Announces a graceful departure of the local node.
    ///
    /// Returns every active member's address and the farewell message to
    /// send there.
    pub fn leave(&mut self) -> (Vec<SocketAddr>, Message) {
        let targets: Vec<SocketAddr> = self
            .members
            .values()
            .filter(|m| m.status.is_active())
            .map(|m| m.member.addr)
            .collect();

        let msg = Message::Gossip {
            updates: vec![MemberUpdate::Left {
                name: self.local.name.clone(),
            }],
            payloads: vec![],
        };

        (targets, msg)
    }

    fn ensure_member(&mut self, name: String, addr: SocketAddr) {
        if name == self.local.name || self.members.contains_key(&name) {
            return;
        }
        let member = Member::new(name.clone(), addr);
        self.members.insert(
            name.clone(),
            MemberState {
                member: member.clone(),
                incarnation: 0,
                status: MemberStatus::Alive,
                status_change: Instant::now(),
            },
        );
        self.queue_update(MemberUpdate::Alive {
            name,
            addr,
            incarnation: 0,
            meta: member.meta.clone(),
        });
        self.events.notify_join(&member);
    }

    fn apply_updates(&mut self, updates: Vec<MemberUpdate>) {
        for update in updates {
            match update {
                MemberUpdate::Alive {
                    name,
                    addr,
                    incarnation,
                    meta,
                } => {
                    if incarnation > MAX_INCARNATION {
                        warn!(
                            "rejecting alive update for {} with excessive incarnation {}",
                            name, incarnation
                        );
                        continue;
                    }
                    self.apply_alive(name, addr, incarnation, meta, false);
                }

                MemberUpdate::Suspect { name, incarnation } => {
                    if incarnation > MAX_INCARNATION {
                        warn!(
                            "rejecting suspect update for {} with excessive incarnation {}",
                            name, incarnation
                        );
                        continue;
                    }
                    if name == self.local.name {
                        // Refute suspicion by incrementing our incarnation
                        if incarnation >= self.incarnation {
                            self.incarnation = incarnation.saturating_add(1);
                            let refutation = self.local_alive_update();
                            self.queue_update(refutation);
                        }
                        continue;
                    }
                    let suspected = match self.members.get_mut(&name) {
                        Some(state)
                            if incarnation >= state.incarnation
                                && state.status == MemberStatus::Alive =>
                        {
                            state.status = MemberStatus::Suspect;
                            state.status_change = Instant::now();
                            true
                        }
                        _ => false,
                    };
                    if suspected {
                        self.queue_update(MemberUpdate::Suspect { name, incarnation });
                    }
                }

                MemberUpdate::Dead { name, incarnation } => {
                    if incarnation > MAX_INCARNATION {
                        warn!(
                            "rejecting dead update for {} with excessive incarnation {}",
                            name, incarnation
                        );
                        continue;
                    }
                    if name == self.local.name {
                        // Refute the death claim
                        self.incarnation = incarnation.saturating_add(1);
                        let refutation = self.local_alive_update();
                        self.queue_update(refutation);
                        continue;
                    }
                    let died = match self.members.get_mut(&name) {
                        Some(state)
                            if incarnation >= state.incarnation && state.status.is_active() =>
                        {
                            state.status = MemberStatus::Dead;
                            state.status_change = Instant::now();
                            Some(state.member.clone())
                        }
                        _ => None,
                    };
                    if let Some(member) = died {
                        self.queue_update(MemberUpdate::Dead { name, incarnation });
                        self.events.notify_leave(&member);
                    }
                }

                MemberUpdate::Left { name } => {
                    if name == self.local.name {
                        continue;
                    }
                    let departed = match self.members.get_mut(&name) {
                        Some(state) if state.status != MemberStatus::Left => {
                            let was_active = state.status.is_active();
                            state.status = MemberStatus::Left;
                            state.status_change = Instant::now();
                            Some((state.member.clone(), was_active))
                        }
                        _ => None,
                    };
                    if let Some((member, was_active)) = departed {
                        self.queue_update(MemberUpdate::Left { name });
                        if was_active {
                            self.events.notify_leave(&member);
                        }
                    }
                }
            }
        }
    }

    fn apply_alive(
        &mut self,
        name: String,
        addr: SocketAddr,
        incarnation: u64,
        meta: bytes::Bytes,
        via_sync: bool,
    ) {
        if name == self.local.name {
            return;
        }
        if incarnation > MAX_INCARNATION {
            warn!(
                "rejecting alive update for {} with excessive incarnation {}",
                name, incarnation
            );
            return;
        }

        match self.members.get_mut(&name) {
            None => {
                let member = Member {
                    name: name.clone(),
                    addr,
                    meta: meta.clone(),
                };
                self.members.insert(
                    name.clone(),
                    MemberState {
                        member: member.clone(),
                        incarnation,
                        status: MemberStatus::Alive,
                        status_change: Instant::now(),
                    },
                );
                self.queue_update(MemberUpdate::Alive {
                    name,
                    addr,
                    incarnation,
                    meta,
                });
                self.events.notify_join(&member);
            }
            Some(state) => {
                enum Outcome {
                    Ignored,
                    Revived(Member, u64),
                    Refreshed(Member, bool),
                }
                let outcome = match state.status {
                    MemberStatus::Dead | MemberStatus::Left => {
                        if incarnation > state.incarnation || via_sync {
                            state.incarnation = state.incarnation.max(incarnation);
                            state.status = MemberStatus::Alive;
                            state.status_change = Instant::now();
                            state.member.addr = addr;
                            state.member.meta = meta.clone();
                            Outcome::Revived(state.member.clone(), state.incarnation)
                        } else {
                            Outcome::Ignored
                        }
                    }
                    MemberStatus::Alive | MemberStatus::Suspect => {
                        if incarnation > state.incarnation {
                            let refreshed = state.member.addr != addr || state.member.meta != meta;
                            state.incarnation = incarnation;
                            state.member.addr = addr;
                            state.member.meta = meta.clone();
                            if state.status == MemberStatus::Suspect {
                                state.status = MemberStatus::Alive;
                                state.status_change = Instant::now();
                            }
                            Outcome::Refreshed(state.member.clone(), refreshed)
                        } else {
                            Outcome::Ignored
                        }
                    }
                };
                match outcome {
                    Outcome::Ignored => {}
                    Outcome::Revived(member, incarnation) => {
                        debug!("member {} revived", member.name);
                        self.queue_update(MemberUpdate::Alive {
                            name,
                            addr,
                            incarnation,
                            meta,
                        });
                        self.events.notify_join(&member);
                    }
                    Outcome::Refreshed(member, refreshed) => {
                        self.queue_update(MemberUpdate::Alive {
                            name,
                            addr,
                            incarnation,
                            meta,
                        });
                        if refreshed {
                            self.events.notify_update(&member);
                        }
                    }
                }
            }
        }
    }

    fn mark_alive(&mut self, name: &str) {
        if let Some(state) = self.members.get_mut(name) {
            if state.status == MemberStatus::Suspect {
                state.status = MemberStatus::Alive;
                state.status_change = Instant::now();
            }
        }
    }

    fn local_alive_update(&self) -> MemberUpdate {
        MemberUpdate::Alive {
            name: self.local.name.clone(),
            addr: self.local.addr,
            incarnation: self.incarnation,
            meta: self.local.meta.clone(),
        }
    }

    /// Checks for timed-out probes and implements two-phase failure
    /// detection.
    ///
    /// Phase 1: direct ping timeout → send PingReq to `indirect_probes`
    ///          random active members and register an indirect probe.
    /// Phase 2: indirect probe timeout → mark the target Suspect.
    ///
    /// Returns the PingReq messages to send.
    fn check_probe_timeouts(&mut self) -> Vec<(SocketAddr, Message)> {
        let timeout = self.probe_timeout;
        let now = Instant::now();
        let mut outgoing = Vec::new();

        // Phase 2: indirect probe timeouts → mark Suspect
        let indirect_timed_out: Vec<_> = self
            .pending_probes
            .iter()
            .filter(|(_, probe)| probe.indirect && now.duration_since(probe.sent_at) > timeout)
            .map(|(seq, probe)| (*seq, probe.target.clone()))
            .collect();

        for (seq, target) in indirect_timed_out {
            self.pending_probes.remove(&seq);

            let incarnation = self
                .members
                .get(&target)
                .filter(|m| m.status == MemberStatus::Alive)
                .map(|m| m.incarnation);

            if let Some(incarnation) = incarnation {
                if let Some(state) = self.members.get_mut(&target) {
                    debug!("member {} failed indirect probe, marking suspect", target);
                    state.status = MemberStatus::Suspect;
                    state.status_change = Instant::now();
                }
                self.queue_update(MemberUpdate::Suspect {
                    name: target,
                    incarnation,
                });
            }
        }

        // Phase 1: direct ping timeouts → send PingReq
        let direct_timed_out: Vec<_> = self
            .pending_probes
            .iter()
            .filter(|(_, probe)| !probe.indirect && now.duration_since(probe.sent_at) > timeout)
            .map(|(seq, probe)| (*seq, probe.target.clone()))
            .collect();

        for (seq, target) in direct_timed_out {
            self.pending_probes.remove(&seq);

            let target_addr = match self.members.get(&target) {
                Some(m) if m.status == MemberStatus::Alive => m.member.addr,
                _ => continue,
            };

            // pick random active members (excluding the target) to relay through
            let relays: Vec<SocketAddr> = self
                .members
                .values()
                .filter(|m| m.status == MemberStatus::Alive && m.member.name != target)
                .map(|m| m.member.addr)
                .collect();

            if relays.is_empty() {
                // no relays available, fall back to immediate suspicion
                let incarnation = self.members.get(&target).map(|m| m.incarnation).unwrap_or(0);
                if let Some(state) = self.members.get_mut(&target) {
                    debug!("member {} timed out with no relays, marking suspect", target);
                    state.status = MemberStatus::Suspect;
                    state.status_change = Instant::now();
                }
                self.queue_update(MemberUpdate::Suspect {
                    name: target,
                    incarnation,
                });
                continue;
            }

            let k = self.indirect_probes.min(relays.len());
            let chosen: Vec<SocketAddr> =
                relays.choose_multiple(&mut rand::rng(), k).copied().collect();

            debug!(
                "member {} direct ping timed out, sending ping-req to {} relays",
                target,
                chosen.len()
            );

            // register an indirect probe; if this times out, we mark Suspect
            let indirect_seq = self.next_seq;
            self.next_seq += 1;
            self.pending_probes.insert(
                indirect_seq,
                PendingProbe {
                    target: target.clone(),
                    sent_at: Instant::now(),
                    indirect: true,
                },
            );

            for relay_addr in chosen {
                outgoing.push((
                    relay_addr,
                    Message::PingReq {
                        seq: indirect_seq,
                        from: self.local.name.clone(),
                        target: target.clone(),
                        target_addr,
                    },
                ));
            }
        }

        outgoing
    }

    fn check_suspicion_timeouts(&mut self) {
        let suspicion_timeout = self.probe_interval * self.suspicion_mult;
        let now = Instant::now();
        let mut confirmed_dead = Vec::new();

        for state in self.members.values() {
            if state.status == MemberStatus::Suspect
                && now.duration_since(state.status_change) > suspicion_timeout
            {
                confirmed_dead.push((state.member.name.clone(), state.incarnation));
            }
        }

        for (name, incarnation) in confirmed_dead {
            let member = match self.members.get_mut(&name) {
                Some(state) => {
                    warn!("member {} confirmed dead after suspicion timeout", name);
                    state.status = MemberStatus::Dead;
                    state.status_change = Instant::now();
                    state.member.clone()
                }
                None => continue,
            };
            self.queue_update(MemberUpdate::Dead { name, incarnation });
            self.events.notify_leave(&member);
        }
    }

    /// Removes stale relay entries that have timed out.
    ///
    /// If the target never responds, the relay entry just sits there.
    /// The original prober handles its own timeout via the indirect probe.
    fn cleanup_stale_relays(&mut self) {
        let timeout = self.probe_timeout;
        let now = Instant::now();
        self.relay_pending
            .retain(|_, entry| now.duration_since(entry.sent_at) <= timeout);
    }

    fn queue_update(&mut self, update: MemberUpdate) {
        self.pending_updates.push(update);
        // When the queue overflows, drop the oldest pending updates. Members
        // re-announce their state every probe period, so a dropped update is
        // re-sent in a later round.
        if self.pending_updates.len() > MAX_PIGGYBACK * 2 {
            self.pending_updates.drain(0..MAX_PIGGYBACK);
        }
    }

    fn collect_updates(&mut self) -> Vec<MemberUpdate> {
        let count = self.pending_updates.len().min(MAX_PIGGYBACK);
        self.pending_updates.drain(0..count).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(127, 0, 0, 1), port))
    }

    /// Records membership events for assertions.
    #[derive(Default)]
    struct RecordingEvents {
        joins: Mutex<Vec<String>>,
        leaves: Mutex<Vec<String>>,
        updates: Mutex<Vec<String>>,
    }

    impl EventDelegate for RecordingEvents {
        fn notify_join(&self, member: &Member) {
            self.joins.lock().unwrap().push(member.name.clone());
        }

        fn notify_leave(&self, member: &Member) {
            self.leaves.lock().unwrap().push(member.name.clone());
        }

        fn notify_update(&self, member: &Member) {
            self.updates.lock().unwrap().push(member.name.clone());
        }
    }

    fn test_engine() -> (Engine, Arc<RecordingEvents>) {
        let events = Arc::new(RecordingEvents::default());
        let local = Member::new("local", test_addr(9000));
        let engine = Engine::new(local, &GossipConfig::default(), events.clone());
        (engine, events)
    }

    fn alive(name: &str, port: u16, incarnation: u64) -> MemberUpdate {
        MemberUpdate::Alive {
            name: name.into(),
            addr: test_addr(port),
            incarnation,
            meta: Bytes::new(),
        }
    }

    #[test]
    fn starts_alone() {
        let (engine, _) = test_engine();
        assert_eq!(engine.alive_count(), 1);
        assert!(engine.members().is_empty());
    }

    #[test]
    fn ping_gets_ack_and_registers_sender() {
        let (mut engine, events) = test_engine();

        let msg = Message::Ping {
            seq: 7,
            from: "peer-a".into(),
            updates: vec![],
        };
        let out = engine.handle_message(msg, test_addr(9001));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, test_addr(9001));
        assert!(matches!(out[0].1, Message::Ack { seq: 7, .. }));
        assert_eq!(engine.alive_count(), 2);
        assert_eq!(events.joins.lock().unwrap().as_slice(), ["peer-a"]);
    }

    #[test]
    fn alive_update_adds_member() {
        let (mut engine, events) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 1)]);

        assert_eq!(engine.member_status("peer-a"), Some(MemberStatus::Alive));
        assert_eq!(events.joins.lock().unwrap().len(), 1);
    }

    #[test]
    fn stale_alive_ignored() {
        let (mut engine, events) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 5)]);
        // lower incarnation with a different address must not win
        engine.apply_updates(vec![alive("peer-a", 9999, 3)]);

        let member = &engine.members()[0];
        assert_eq!(member.addr, test_addr(9001));
        assert!(events.updates.lock().unwrap().is_empty());
    }

    #[test]
    fn newer_alive_refreshes_descriptor() {
        let (mut engine, events) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 1)]);
        engine.apply_updates(vec![alive("peer-a", 9002, 2)]);

        let member = &engine.members()[0];
        assert_eq!(member.addr, test_addr(9002));
        assert_eq!(events.updates.lock().unwrap().as_slice(), ["peer-a"]);
    }

    #[test]
    fn dead_update_notifies_leave() {
        let (mut engine, events) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 1)]);
        engine.apply_updates(vec![MemberUpdate::Dead {
            name: "peer-a".into(),
            incarnation: 1,
        }]);

        assert_eq!(engine.member_status("peer-a"), Some(MemberStatus::Dead));
        assert_eq!(engine.alive_count(), 1);
        assert_eq!(events.leaves.lock().unwrap().as_slice(), ["peer-a"]);
    }

    #[test]
    fn left_update_notifies_leave_once() {
        let (mut engine, events) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 1)]);
        engine.apply_updates(vec![MemberUpdate::Left {
            name: "peer-a".into(),
        }]);
        engine.apply_updates(vec![MemberUpdate::Left {
            name: "peer-a".into(),
        }]);

        assert_eq!(engine.member_status("peer-a"), Some(MemberStatus::Left));
        assert_eq!(events.leaves.lock().unwrap().len(), 1);
    }

    #[test]
    fn suspicion_about_self_is_refuted() {
        let (mut engine, _) = test_engine();
        let before = engine.local_incarnation();
        engine.apply_updates(vec![MemberUpdate::Suspect {
            name: "local".into(),
            incarnation: before,
        }]);

        assert!(engine.local_incarnation() > before);
        // the refutation is queued for dissemination
        let updates = engine.collect_updates();
        assert!(updates
            .iter()
            .any(|u| matches!(u, MemberUpdate::Alive { name, .. } if name == "local")));
    }

    #[test]
    fn excessive_incarnation_rejected() {
        let (mut engine, _) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, u64::MAX)]);
        assert!(engine.member_status("peer-a").is_none());
    }

    #[test]
    fn snapshot_merge_revives_dead_member() {
        let (mut engine, events) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 4)]);
        engine.apply_updates(vec![MemberUpdate::Dead {
            name: "peer-a".into(),
            incarnation: 4,
        }]);
        assert_eq!(engine.alive_count(), 1);

        // same incarnation, but delivered through a direct exchange
        engine.merge_snapshot(vec![MemberSnapshot {
            name: "peer-a".into(),
            addr: test_addr(9001),
            incarnation: 4,
            meta: Bytes::new(),
        }]);

        assert_eq!(engine.member_status("peer-a"), Some(MemberStatus::Alive));
        assert_eq!(events.joins.lock().unwrap().len(), 2);
    }

    #[test]
    fn snapshot_includes_self_and_active_members() {
        let (mut engine, _) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 1), alive("peer-b", 9002, 1)]);
        engine.apply_updates(vec![MemberUpdate::Left {
            name: "peer-b".into(),
        }]);

        let snapshot = engine.snapshot();
        let names: Vec<_> = snapshot.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"local"));
        assert!(names.contains(&"peer-a"));
        assert!(!names.contains(&"peer-b"));
    }

    #[test]
    fn probe_tick_with_no_members() {
        let (mut engine, _) = test_engine();
        assert!(engine.probe_tick().is_empty());
    }

    #[test]
    fn probe_tick_sends_ping() {
        let (mut engine, _) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 1)]);

        let out = engine.probe_tick();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, test_addr(9001));
        assert!(matches!(out[0].1, Message::Ping { .. }));
    }

    #[test]
    fn direct_timeout_sends_ping_req() {
        let events = Arc::new(RecordingEvents::default());
        let config = GossipConfig {
            probe_timeout: Duration::from_millis(0), // expire immediately
            ..GossipConfig::default()
        };
        let mut engine = Engine::new(Member::new("local", test_addr(9000)), &config, events);

        engine.apply_updates(vec![alive("target", 9001, 1), alive("relay", 9002, 1)]);

        // tick 1 sends the direct probe; tick 2 sees it timed out
        engine.probe_tick();
        let out = engine.probe_tick();

        assert!(
            out.iter()
                .any(|(_, m)| matches!(m, Message::PingReq { .. })),
            "expected a ping-req after the direct probe timed out"
        );
    }

    #[test]
    fn indirect_timeout_marks_suspect() {
        let events = Arc::new(RecordingEvents::default());
        let config = GossipConfig {
            probe_timeout: Duration::from_millis(0),
            indirect_probes: 1,
            ..GossipConfig::default()
        };
        let mut engine = Engine::new(Member::new("local", test_addr(9000)), &config, events);

        engine.apply_updates(vec![alive("a", 9001, 1), alive("b", 9002, 1)]);

        // tick 1: direct ping; tick 2: ping-req; tick 3: indirect timeout
        engine.probe_tick();
        engine.probe_tick();
        engine.probe_tick();

        let suspects = [
            engine.member_status("a"),
            engine.member_status("b"),
        ]
        .iter()
        .filter(|s| **s == Some(MemberStatus::Suspect))
        .count();
        assert!(suspects > 0, "expected at least one suspect member");
    }

    #[test]
    fn suspicion_timeout_confirms_dead() {
        let events = Arc::new(RecordingEvents::default());
        let config = GossipConfig {
            probe_timeout: Duration::from_millis(0),
            probe_interval: Duration::from_millis(0), // suspicion expires immediately
            ..GossipConfig::default()
        };
        let mut engine =
            Engine::new(Member::new("local", test_addr(9000)), &config, events.clone());

        engine.apply_updates(vec![alive("target", 9001, 1)]);
        engine.apply_updates(vec![MemberUpdate::Suspect {
            name: "target".into(),
            incarnation: 1,
        }]);

        engine.probe_tick();

        assert_eq!(engine.member_status("target"), Some(MemberStatus::Dead));
        assert_eq!(events.leaves.lock().unwrap().as_slice(), ["target"]);
    }

    #[test]
    fn leave_targets_every_active_member() {
        let (mut engine, _) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 1), alive("peer-b", 9002, 1)]);

        let (targets, msg) = engine.leave();
        assert_eq!(targets.len(), 2);
        match msg {
            Message::Gossip { updates, .. } => {
                assert!(matches!(&updates[0], MemberUpdate::Left { name } if name == "local"));
            }
            other => panic!("expected Gossip, got {other:?}"),
        }
    }

    #[test]
    fn gossip_round_drains_updates() {
        let (mut engine, _) = test_engine();
        engine.apply_updates(vec![alive("peer-a", 9001, 1)]);

        let (targets, updates) = engine.gossip_round(3);
        assert_eq!(targets.len(), 1);
        assert!(!updates.is_empty());

        // drained: a second round has nothing new
        let (_, updates) = engine.gossip_round(3);
        assert!(updates.is_empty());
    }
}
