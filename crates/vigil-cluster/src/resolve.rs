//! Seed peer resolution.
//!
//! Cluster members are commonly given as headless-service DNS names that
//! resolve to nothing until the other instances have started. The resolver
//! therefore tolerates an empty-then-populated evolution: an empty result
//! is retried on a fixed tick, optionally until at least one non-self
//! address appears. A name that fails to resolve outright is assumed to be
//! a direct address and passed through untouched.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClusterError;

/// How often an empty DNS result is retried.
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Host lookup seam, so tests can substitute failing or scripted
/// resolvers.
#[allow(async_fn_in_trait)]
pub trait Resolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// System resolver backed by the runtime's host lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

impl Resolver for DnsResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        // lookup_host wants a port; it plays no role in resolution
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Expands seed peers into concrete "ip:port" endpoints, filtering out the
/// local advertise address.
///
/// With `wait_if_empty`, a seed that keeps resolving to nothing is retried
/// until it yields a non-self address or `cancel` fires; without it, an
/// empty result is accepted. A DNS error during the retry loop is
/// surfaced, since at that point the name is known to exist.
pub async fn resolve_peers<R: Resolver>(
    resolver: &R,
    seeds: &[String],
    my_address: &str,
    wait_if_empty: bool,
    cancel: &CancellationToken,
) -> Result<Vec<String>, ClusterError> {
    let mut resolved = Vec::new();

    for seed in seeds {
        let (host, port) = match split_host_port(seed) {
            Some(parts) => parts,
            None => {
                return Err(ClusterError::InvalidSeed { addr: seed.clone() });
            }
        };

        let mut ips = match resolver.lookup(host).await {
            // Assume a direct address.
            Err(_) => {
                resolved.push(seed.clone());
                continue;
            }
            Ok(ips) => remove_my_addr(ips, port, my_address),
        };

        if ips.is_empty() {
            loop {
                match resolver.lookup(host).await {
                    Err(e) => {
                        return Err(ClusterError::Resolve {
                            addr: seed.clone(),
                            source: e,
                        });
                    }
                    Ok(found) => {
                        let found = remove_my_addr(found, port, my_address);
                        if !found.is_empty() || !wait_if_empty {
                            ips = found;
                            break;
                        }
                    }
                }
                debug!("seed {} resolved to no peers, retrying", seed);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(ClusterError::Resolve {
                            addr: seed.clone(),
                            source: io::Error::new(
                                io::ErrorKind::Interrupted,
                                "cancelled while waiting for peers to appear",
                            ),
                        });
                    }
                    _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                }
            }
        }

        for ip in ips {
            resolved.push(SocketAddr::new(ip, port).to_string());
        }
    }

    Ok(resolved)
}

fn remove_my_addr(ips: Vec<IpAddr>, port: u16, my_address: &str) -> Vec<IpAddr> {
    ips.into_iter()
        .filter(|ip| SocketAddr::new(*ip, port).to_string() != my_address)
        .collect()
}

/// Splits "host:port" (or "[v6]:port") into its parts.
pub(crate) fn split_host_port(s: &str) -> Option<(&str, u16)> {
    let (host, port) = s.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']')?,
        None => host,
    };
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}

/// Whether any of the given "host:port" peers points outside the local
/// machine.
pub(crate) fn has_nonlocal(peers: &[String]) -> bool {
    peers.iter().any(|peer| {
        let host = split_host_port(peer).map(|(h, _)| h).unwrap_or(peer);
        match host.parse::<IpAddr>() {
            Ok(ip) => !ip.is_loopback(),
            Err(_) => !host.eq_ignore_ascii_case("localhost"),
        }
    })
}

/// Whether an advertise address is unreachable from other machines
/// (loopback, unspecified, or plain "localhost").
pub(crate) fn is_unroutable(addr: &str) -> bool {
    let host = split_host_port(addr).map(|(h, _)| h).unwrap_or(addr);
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_unspecified() || ip.is_loopback(),
        Err(_) => host.eq_ignore_ascii_case("localhost"),
    }
}
