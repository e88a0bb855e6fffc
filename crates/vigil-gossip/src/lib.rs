//! vigil-gossip: SWIM gossip transport for the vigil cluster layer.
//!
//! This crate provides the membership transport that the cluster layer
//! builds on:
//!
//! - **Failure detection**: SWIM-style UDP probing with indirect probes,
//!   suspicion and incarnation-based refutation
//! - **State exchange**: periodic TCP push/pull of the full membership and
//!   application state between random pairs of nodes
//! - **Dissemination**: piggybacked membership updates plus a
//!   transmit-limited queue for best-effort application broadcasts
//!
//! The application plugs in through two seams: [`Delegate`] (state
//! serialization, broadcast sourcing, message delivery) and
//! [`EventDelegate`] (join/leave/update notifications). Both are called
//! synchronously from the transport's tasks and must not block.

mod config;
mod delegate;
mod engine;
mod error;
mod member;
mod message;
mod queue;
mod transport;

pub use config::GossipConfig;
pub use delegate::{Delegate, EventDelegate};
pub use engine::Engine;
pub use error::GossipError;
pub use member::{Member, MemberStatus};
pub use message::{MemberSnapshot, MemberUpdate, Message};
pub use queue::{Broadcast, TransmitQueue};
pub use transport::Gossiper;
