//! Cluster configuration.

use std::time::Duration;

/// Configuration for [`Peer::join`](crate::Peer::join).
///
/// The durations mirror the knobs of the underlying transport plus the
/// cluster layer's own reconnect behavior. A zero `reconnect_interval`
/// disables reconnection attempts; a zero `reconnect_timeout` disables
/// eviction of long-failed peers.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// "host:port" the transport binds on. Port 0 picks a free port.
    pub bind_addr: String,
    /// "host:port" advertised to other peers when it differs from the
    /// bind address (NAT, container networking).
    pub advertise_addr: Option<String>,
    /// Seed peers in "host:port" form. Hostnames are resolved via DNS;
    /// unresolvable hosts are passed through as direct addresses.
    pub seeds: Vec<String>,
    /// Keep re-resolving seeds until at least one non-self peer appears.
    pub wait_if_empty: bool,
    /// Interval of the transport's full TCP state exchanges.
    pub push_pull_interval: Duration,
    /// Interval of the transport's dissemination rounds.
    pub gossip_interval: Duration,
    /// Deadline for TCP operations of the transport.
    pub tcp_timeout: Duration,
    /// Deadline for a probe acknowledgement.
    pub probe_timeout: Duration,
    /// Interval of failure-detector probes.
    pub probe_interval: Duration,
    /// How often failed peers are re-dialed.
    pub reconnect_interval: Duration,
    /// How long a failed peer is retried before being forgotten.
    pub reconnect_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9094".to_string(),
            advertise_addr: None,
            seeds: Vec::new(),
            wait_if_empty: false,
            push_pull_interval: Duration::from_secs(60),
            gossip_interval: Duration::from_millis(200),
            tcp_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_millis(500),
            probe_interval: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(10),
            reconnect_timeout: Duration::from_secs(6 * 60 * 60),
        }
    }
}
