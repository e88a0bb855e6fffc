//! Cluster member descriptors.

use std::net::SocketAddr;

use bytes::Bytes;

/// A node known to the transport.
///
/// `name` is the unique identity; `addr` is where the node's transport
/// listens; `meta` is an opaque application-supplied blob carried with every
/// alive announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub addr: SocketAddr,
    pub meta: Bytes,
}

impl Member {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            meta: Bytes::new(),
        }
    }

    /// The "ip:port" form of the member's transport address.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}

/// Health status of a member as tracked by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Alive,
    Suspect,
    Dead,
    Left,
}

impl MemberStatus {
    /// Whether the member counts towards cluster size and is a valid
    /// probe or gossip target.
    pub fn is_active(self) -> bool {
        matches!(self, MemberStatus::Alive | MemberStatus::Suspect)
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberStatus::Alive => write!(f, "alive"),
            MemberStatus::Suspect => write!(f, "suspect"),
            MemberStatus::Dead => write!(f, "dead"),
            MemberStatus::Left => write!(f, "left"),
        }
    }
}
