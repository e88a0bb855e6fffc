//! Transport configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the gossip transport.
///
/// The defaults are tuned for a LAN deployment of a handful of nodes, which
/// is the common shape of an alert notification cluster.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Unique name of the local node within the cluster.
    pub node_name: String,
    /// Address to bind the UDP socket and TCP listener on. Port 0 picks a
    /// free port; the actual bound address is reported by the transport.
    pub bind_addr: String,
    /// Address advertised to other nodes. Defaults to the bound address.
    pub advertise_addr: Option<SocketAddr>,
    /// How often to gossip queued updates and broadcasts to random nodes.
    pub gossip_interval: Duration,
    /// How many random nodes each gossip round is sent to.
    pub gossip_fanout: usize,
    /// How often to run a full TCP state exchange with a random node.
    pub push_pull_interval: Duration,
    /// Deadline for TCP connect/read/write during push/pull.
    pub tcp_timeout: Duration,
    /// How often to probe a random node.
    pub probe_interval: Duration,
    /// How long to wait for a probe acknowledgement.
    pub probe_timeout: Duration,
    /// Multiplier for the suspicion timeout (probe_interval * suspicion_mult).
    pub suspicion_mult: u32,
    /// Number of nodes asked to probe indirectly on our behalf.
    pub indirect_probes: usize,
    /// Retransmit multiplier for the broadcast queue.
    pub retransmit_mult: usize,
    /// Upper bound for a UDP datagram, including headers.
    pub max_packet_size: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            bind_addr: "0.0.0.0:9094".to_string(),
            advertise_addr: None,
            gossip_interval: Duration::from_millis(200),
            gossip_fanout: 3,
            push_pull_interval: Duration::from_secs(60),
            tcp_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(500),
            suspicion_mult: 5,
            indirect_probes: 3,
            retransmit_mult: 4,
            max_packet_size: 1400,
        }
    }
}
