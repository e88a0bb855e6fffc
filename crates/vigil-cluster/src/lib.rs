//! vigil-cluster: membership and state replication for the vigil
//! notification service.
//!
//! Every vigil instance runs one [`Peer`]. The peer joins a gossip mesh of
//! the other instances, tracks who is alive, retries peers that have gone
//! away and eventually forgets them, and replicates small shared states
//! (silences, notification-log entries) cluster-wide in a best-effort
//! manner.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use vigil_cluster::{ClusterConfig, Peer};
//!
//! let peer = Peer::join(ClusterConfig {
//!     bind_addr: "0.0.0.0:9094".into(),
//!     seeds: vec!["vigil-0.vigil:9094".into()],
//!     ..ClusterConfig::default()
//! })
//! .await?;
//!
//! let silences = peer.add_state("sil", my_silence_state.clone());
//! peer.settle(shutdown_token.child_token(), Duration::from_secs(5)).await;
//! // peer.ready() is now true; broadcast at will:
//! silences.broadcast(&encoded_silence);
//! ```
//!
//! Readiness is a heuristic barrier, not consensus: [`Peer::settle`] opens
//! the ready gate once the membership count stops changing, so that a
//! freshly started instance learns most of the cluster's silences before
//! it begins acting on alerts.

mod channel;
mod config;
mod delegate;
mod error;
mod part;
mod peer;
mod resolve;
mod state;

pub use channel::Channel;
pub use config::ClusterConfig;
pub use error::ClusterError;
pub use part::Part;
pub use peer::{Peer, PeerStatus};
pub use resolve::{resolve_peers, DnsResolver, Resolver};
pub use state::State;

pub use vigil_gossip::Member;
