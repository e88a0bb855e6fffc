//! Tokio runtime around the membership engine.
//!
//! Owns the UDP socket and TCP listener, drives the probe and gossip
//! ticks, answers push/pull exchanges and exposes the join/leave API.
//! All tasks stop when the cancellation token fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GossipConfig;
use crate::delegate::{Delegate, EventDelegate};
use crate::engine::Engine;
use crate::error::GossipError;
use crate::member::Member;
use crate::message::Message;

/// Upper bound for the node metadata blob.
const MAX_META_SIZE: usize = 512;

/// Upper bound for one TCP push/pull frame.
const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Per-payload framing cost inside a Gossip datagram (u32 length prefix).
const PAYLOAD_OVERHEAD: usize = 4;

/// The gossip transport: SWIM failure detection over UDP plus TCP
/// push/pull state exchange.
pub struct Gossiper {
    config: GossipConfig,
    local: Member,
    engine: Mutex<Engine>,
    delegate: Arc<dyn Delegate>,
    udp: Arc<UdpSocket>,
    cancel: CancellationToken,
}

impl Gossiper {
    /// Binds the transport and spawns its background tasks.
    ///
    /// The TCP listener is bound first; the UDP socket reuses whatever
    /// port it got, so `bind_addr` may carry port 0.
    pub async fn start(
        config: GossipConfig,
        delegate: Arc<dyn Delegate>,
        events: Arc<dyn EventDelegate>,
    ) -> Result<Arc<Self>, GossipError> {
        let bind: SocketAddr =
            config
                .bind_addr
                .parse()
                .map_err(|e: std::net::AddrParseError| GossipError::InvalidBindAddr {
                    addr: config.bind_addr.clone(),
                    reason: e.to_string(),
                })?;

        let listener = TcpListener::bind(bind).await.map_err(|e| GossipError::Bind {
            addr: bind.to_string(),
            source: e,
        })?;
        let bound = listener.local_addr()?;

        let udp_addr = SocketAddr::new(bind.ip(), bound.port());
        let udp = UdpSocket::bind(udp_addr).await.map_err(|e| GossipError::Bind {
            addr: udp_addr.to_string(),
            source: e,
        })?;

        let advertise = config.advertise_addr.unwrap_or(bound);

        let mut meta = delegate.node_meta(MAX_META_SIZE);
        if meta.len() > MAX_META_SIZE {
            meta = meta.slice(..MAX_META_SIZE);
        }
        let local = Member {
            name: config.node_name.clone(),
            addr: advertise,
            meta,
        };

        let engine = Engine::new(local.clone(), &config, events);

        let gossiper = Arc::new(Self {
            config,
            local,
            engine: Mutex::new(engine),
            delegate,
            udp: Arc::new(udp),
            cancel: CancellationToken::new(),
        });

        info!("gossip transport listening on {}", bound);
        gossiper.spawn_datagram_task();
        gossiper.spawn_accept_task(listener);
        gossiper.spawn_push_pull_task();

        Ok(gossiper)
    }

    /// The local node as other members see it.
    pub fn local_member(&self) -> Member {
        self.local.clone()
    }

    /// The address advertised to other nodes.
    pub fn advertise_addr(&self) -> SocketAddr {
        self.local.addr
    }

    /// All active remote members.
    pub async fn members(&self) -> Vec<Member> {
        self.engine.lock().await.members()
    }

    /// Number of active members including the local node.
    pub async fn num_members(&self) -> usize {
        self.engine.lock().await.alive_count()
    }

    /// Contacts each address with a join push/pull exchange.
    ///
    /// Returns the number of peers successfully contacted. It is an error
    /// only if addresses were given and none of them answered.
    pub async fn join(&self, peers: &[String]) -> Result<usize, GossipError> {
        let mut joined = 0usize;
        let mut last_err = None;

        for peer in peers {
            match self.push_pull(peer, true).await {
                Ok(()) => {
                    debug!("joined via {}", peer);
                    joined += 1;
                }
                Err(e) => {
                    debug!("join via {} failed: {}", peer, e);
                    last_err = Some(e);
                }
            }
        }

        if joined == 0 && !peers.is_empty() {
            return Err(GossipError::JoinFailed {
                attempted: peers.len(),
                last: last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no addresses".to_string()),
            });
        }
        Ok(joined)
    }

    /// Announces a graceful departure and stops all transport tasks.
    ///
    /// `timeout` bounds how long the farewell datagrams may take; zero
    /// skips the wait entirely.
    pub async fn leave(&self, timeout: Duration) -> Result<(), GossipError> {
        let (targets, msg) = self.engine.lock().await.leave();
        let encoded = msg.encode();

        let farewell = async {
            for target in targets {
                if let Err(e) = self.udp.send_to(&encoded, target).await {
                    debug!("farewell to {} failed: {}", target, e);
                }
            }
        };
        if timeout.is_zero() {
            farewell.await;
        } else if tokio::time::timeout(timeout, farewell).await.is_err() {
            debug!("leave timed out before all farewells were sent");
        }

        self.cancel.cancel();
        Ok(())
    }

    // -- background tasks --

    /// UDP receive loop multiplexed with the probe and gossip ticks.
    fn spawn_datagram_task(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut recv_buf = vec![0u8; 65535];
            let mut probe = tokio::time::interval(this.config.probe_interval);
            probe.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut gossip = tokio::time::interval(this.config.gossip_interval);
            gossip.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => return,

                    _ = probe.tick() => {
                        let outgoing = this.engine.lock().await.probe_tick();
                        this.send_all(outgoing).await;
                    }

                    _ = gossip.tick() => {
                        this.gossip_round().await;
                    }

                    result = this.udp.recv_from(&mut recv_buf) => {
                        match result {
                            Ok((len, from)) => this.handle_datagram(&recv_buf[..len], from).await,
                            Err(e) => warn!("gossip recv error: {}", e),
                        }
                    }
                }
            }
        });
    }

    async fn handle_datagram(&self, buf: &[u8], from: SocketAddr) {
        let msg = match Message::decode(buf) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("gossip decode error from {}: {}", from, e);
                return;
            }
        };

        // Application payloads are split off before the engine sees the
        // message; the engine only handles membership.
        let payloads = match msg {
            Message::Gossip { updates, payloads } => {
                let replies = self
                    .engine
                    .lock()
                    .await
                    .handle_message(Message::Gossip { updates, payloads: vec![] }, from);
                self.send_all(replies).await;
                payloads
            }
            other => {
                let replies = self.engine.lock().await.handle_message(other, from);
                self.send_all(replies).await;
                return;
            }
        };

        for payload in payloads {
            self.delegate.notify_msg(&payload);
        }
    }

    /// One dissemination round: pending membership updates plus queued
    /// application broadcasts, sent to a few random members.
    async fn gossip_round(&self) {
        let (targets, updates) = self
            .engine
            .lock()
            .await
            .gossip_round(self.config.gossip_fanout);
        if targets.is_empty() {
            return;
        }

        // Budget the application payloads with whatever the membership
        // updates left over in the datagram.
        let base = Message::Gossip {
            updates: updates.clone(),
            payloads: vec![],
        }
        .encode();
        let budget = self.config.max_packet_size.saturating_sub(base.len());
        let payloads = self.delegate.get_broadcasts(PAYLOAD_OVERHEAD, budget);

        if updates.is_empty() && payloads.is_empty() {
            return;
        }

        let encoded = Message::Gossip { updates, payloads }.encode();
        for target in targets {
            if let Err(e) = self.udp.send_to(&encoded, target).await {
                debug!("gossip send error to {}: {}", target, e);
            }
        }
    }

    async fn send_all(&self, outgoing: Vec<(SocketAddr, Message)>) {
        for (addr, msg) in outgoing {
            let encoded = msg.encode();
            if let Err(e) = self.udp.send_to(&encoded, addr).await {
                debug!("gossip send error to {}: {}", addr, e);
            }
        }
    }

    /// TCP accept loop answering push/pull exchanges.
    fn spawn_accept_task(self: &Arc<Self>, listener: TcpListener) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => return,

                    result = listener.accept() => {
                        match result {
                            Ok((stream, remote)) => {
                                let this = Arc::clone(&this);
                                tokio::spawn(async move {
                                    if let Err(e) = this.answer_push_pull(stream).await {
                                        debug!("push/pull with {} failed: {}", remote, e);
                                    }
                                });
                            }
                            Err(e) => warn!("push/pull accept error: {}", e),
                        }
                    }
                }
            }
        });
    }

    /// Periodic anti-entropy: full state exchange with one random member.
    fn spawn_push_pull_task(self: &Arc<Self>) {
        if self.config.push_pull_interval.is_zero() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.push_pull_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately; nothing to exchange yet
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => return,

                    _ = interval.tick() => {
                        let target = {
                            use rand::prelude::IndexedRandom;
                            let members = this.engine.lock().await.members();
                            members.choose(&mut rand::rng()).map(|m| m.address())
                        };
                        if let Some(addr) = target {
                            if let Err(e) = this.push_pull(&addr, false).await {
                                debug!("push/pull with {} failed: {}", addr, e);
                            }
                        }
                    }
                }
            }
        });
    }

    // -- push/pull --

    async fn local_frame(&self, join: bool) -> Bytes {
        let members = self.engine.lock().await.snapshot();
        let state = self.delegate.local_state(join);
        let msg = Message::PushPull {
            join,
            members,
            state,
        };
        let mut buf = BytesMut::with_capacity(256);
        msg.encode_into(&mut buf);
        buf.freeze()
    }

    async fn merge_remote_frame(&self, msg: Message) {
        if let Message::PushPull {
            join,
            members,
            state,
        } = msg
        {
            self.engine.lock().await.merge_snapshot(members);
            self.delegate.merge_remote_state(&state, join);
        } else {
            debug!("unexpected message on the push/pull stream");
        }
    }

    /// Client side of a push/pull exchange with `addr`.
    async fn push_pull(&self, addr: &str, join: bool) -> std::io::Result<()> {
        let deadline = self.config.tcp_timeout;

        let mut stream = tokio::time::timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

        let frame = self.local_frame(join).await;
        tokio::time::timeout(deadline, write_frame(&mut stream, &frame))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))??;

        let reply = tokio::time::timeout(deadline, read_frame(&mut stream))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;

        let msg = Message::decode(&reply)?;
        self.merge_remote_frame(msg).await;
        Ok(())
    }

    /// Server side of a push/pull exchange.
    async fn answer_push_pull(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let deadline = self.config.tcp_timeout;

        let request = tokio::time::timeout(deadline, read_frame(&mut stream))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;
        let msg = Message::decode(&request)?;

        let join = matches!(msg, Message::PushPull { join: true, .. });
        let reply = self.local_frame(join).await;
        tokio::time::timeout(deadline, write_frame(&mut stream, &reply))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))??;

        self.merge_remote_frame(msg).await;
        Ok(())
    }
}

async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> std::io::Result<()> {
    let mut header = BytesMut::with_capacity(4);
    header.put_u32_le(body.len() as u32);
    stream.write_all(&header).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("push/pull frame of {len} bytes exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(body)
}
