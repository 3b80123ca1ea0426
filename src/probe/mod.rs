//! Interface reachability probing.
//!
//! Given a destination and the set of current interfaces, concurrently
//! attempts a real connection from each plausible candidate (socket bound
//! to that interface) within a bounded time window, and reports which ones
//! got through. Used by callers that must pick between several active
//! attachments (Wi-Fi vs. cellular vs. Ethernet).


use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::state::{self, is_global_unicast, is_usable_v4, Interface, InterfaceAddressSet};

/// Deadline for a single candidate's connection attempt.
pub const PER_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// Deadline for the whole probing round. Candidates that have not reported
/// by then are given up on, and the partial results are returned inside
/// [`Error::ProbeTimeout`].
pub const OVERALL_PROBE_TIMEOUT: Duration = Duration::from_millis(600);

/// Destination network to probe over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// TCP over either address family.
    #[default]
    Tcp,
    /// TCP over IPv4 only.
    Tcp4,
    /// TCP over IPv6 only.
    Tcp6,
}

impl Network {
    fn admits(&self, addr: &IpAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }
}

/// Pre-filter excluding interfaces from consideration; platform layers use
/// this to skip interfaces they know are dead ends.
pub type InterfaceFilter = dyn Fn(&Interface) -> bool + Send + Sync;

/// Re-orders reachable candidates by caller-defined priority, best first.
pub type PrioritySorter = dyn Fn(Vec<InetReachability>) -> Vec<InetReachability> + Send + Sync;

/// Supplies the platform's high-level view of the default interface index,
/// consulted after sorting: a reachable candidate matching the hint wins.
pub type DefaultIfaceHintFn = dyn Fn() -> Option<u32> + Send + Sync;

/// Configuration for one probing call.
pub struct ProbeOptions {
    pub network: Network,
    pub host: String,
    pub port: u16,
    pub filter: Option<Box<InterfaceFilter>>,
    pub sort: Option<Box<PrioritySorter>>,
    pub default_iface_hint: Option<Box<DefaultIfaceHintFn>>,
    /// The mesh client's own interface name, never probed.
    pub self_interface: Option<String>,
}

impl ProbeOptions {
    pub fn new(network: Network, host: impl Into<String>, port: u16) -> Self {
        Self {
            network,
            host: host.into(),
            port,
            filter: None,
            sort: None,
            default_iface_hint: None,
            self_interface: None,
        }
    }
}

/// One candidate's probe outcome.
#[derive(Debug, Clone, Serialize)]
pub struct InetReachability {
    pub interface: Interface,
    pub reachable: bool,
    /// Connection error, if the probe failed.
    pub error: Option<String>,
}

/// Probes all plausible candidate interfaces concurrently to determine
/// which can reach the destination.
///
/// Returns an empty result set (not an error) when there are no candidates;
/// a timeout after [`OVERALL_PROBE_TIMEOUT`] surfaces the partial results
/// inside the error so the caller can still decide.
pub async fn probe_interfaces_reachability(
    opts: &ProbeOptions,
) -> Result<Vec<InetReachability>> {
    let (interfaces, interface_ips) = state::enumerate_interfaces()?;
    let candidates = filter_candidates(interfaces.into_values(), &interface_ips, opts);
    if candidates.is_empty() {
        debug!(host = %opts.host, port = opts.port, "no candidate interfaces to probe");
        return Ok(Vec::new());
    }

    let dest = resolve_destination(opts).await?;

    // Channel sized to the candidate count so every spawned task can always
    // deliver without blocking, even past our deadline.
    let expected = candidates.len();
    let (tx, mut rx) = mpsc::channel::<InetReachability>(expected);
    for interface in candidates {
        let tx = tx.clone();
        tokio::spawn(async move {
            let report = match connect_via(&interface, dest).await {
                Ok(()) => InetReachability { interface, reachable: true, error: None },
                Err(err) => InetReachability {
                    interface,
                    reachable: false,
                    error: Some(err.to_string()),
                },
            };
            let _ = tx.try_send(report);
        });
    }
    drop(tx);

    let started = Instant::now();
    let deadline = tokio::time::sleep(OVERALL_PROBE_TIMEOUT);
    tokio::pin!(deadline);
    let mut results = Vec::with_capacity(expected);
    while results.len() < expected {
        tokio::select! {
            Some(report) = rx.recv() => results.push(report),
            _ = &mut deadline => {
                let received = results.len();
                return Err(Error::ProbeTimeout {
                    results,
                    received,
                    expected,
                    elapsed: started.elapsed(),
                });
            }
        }
    }
    Ok(results)
}

/// Finds an interface that can reach `host:port`, preferring the caller's
/// sort order and the default-interface hint.
///
/// Returns `Ok(None)` when no interface can reach the destination (or no
/// candidate exists at all); an error only when enumeration fails or the
/// probing round times out.
pub async fn find_interface_that_can_reach(opts: &ProbeOptions) -> Result<Option<Interface>> {
    let results = probe_interfaces_reachability(opts).await?;
    Ok(select_reachable(results, opts))
}

/// Keeps interfaces that are up, running, non-loopback, pass the caller's
/// filter, are not the mesh client's own, and carry at least one IPv4 or
/// globally-routable IPv6 address.
fn filter_candidates(
    interfaces: impl IntoIterator<Item = Interface>,
    interface_ips: &InterfaceAddressSet,
    opts: &ProbeOptions,
) -> Vec<Interface> {
    let mut candidates: Vec<Interface> = interfaces
        .into_iter()
        .filter(|iface| {
            if let Some(filter) = &opts.filter {
                if !filter(iface) {
                    return false;
                }
            }
            if !iface.is_up() || !iface.is_running() || iface.is_loopback() {
                return false;
            }
            if Some(iface.name.as_str()) == opts.self_interface.as_deref() {
                return false;
            }
            has_v4_or_global_v6(interface_ips.get(&iface.name))
        })
        .collect();
    candidates.sort_by_key(|iface| iface.index);
    candidates
}

fn has_v4_or_global_v6(prefixes: Option<&Vec<ipnet::IpNet>>) -> bool {
    prefixes.is_some_and(|prefixes| {
        prefixes.iter().any(|net| {
            let addr = net.addr();
            is_usable_v4(&addr) || (addr.is_ipv6() && is_global_unicast(&addr))
        })
    })
}

/// Picks the winner among probe results: reachable only, caller's sort
/// order, then the default-interface hint overrides the top choice.
fn select_reachable(results: Vec<InetReachability>, opts: &ProbeOptions) -> Option<Interface> {
    let mut reachable: Vec<InetReachability> =
        results.into_iter().filter(|r| r.reachable).collect();
    if reachable.is_empty() {
        debug!(host = %opts.host, port = opts.port, "no interface reached the destination");
        return None;
    }
    if let Some(sort) = &opts.sort {
        reachable = sort(reachable);
    }

    let mut chosen = 0usize;
    if let Some(hint) = &opts.default_iface_hint {
        if let Some(index) = hint() {
            if let Some(pos) = reachable.iter().position(|r| r.interface.index == index) {
                debug!(index, "using default interface hint");
                chosen = pos;
            }
        }
    }
    let interface = reachable[chosen].interface.clone();
    debug!(
        iface = %interface.name,
        index = interface.index,
        host = %opts.host,
        port = opts.port,
        "selected interface for destination"
    );
    Some(interface)
}

/// Resolves the destination to the first address the requested network
/// admits.
async fn resolve_destination(opts: &ProbeOptions) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((opts.host.as_str(), opts.port)).await?;
    addrs
        .find(|sa| opts.network.admits(&sa.ip()))
        .ok_or_else(|| {
            Error::invalid_data(format!(
                "no {:?}-compatible address for {}",
                opts.network, opts.host
            ))
        })
}

/// Attempts a TCP connection to `addr` from a socket bound to `iface`,
/// within the per-probe deadline.
async fn connect_via(iface: &Interface, addr: SocketAddr) -> Result<()> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    bind_to_interface(&socket, iface, &addr)?;
    socket.set_nonblocking(true)?;
    let socket = tokio::net::TcpSocket::from_std_stream(socket.into());
    match timeout(PER_PROBE_TIMEOUT, socket.connect(addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(err)) => Err(Error::Io(err)),
        Err(_) => Err(Error::system(format!("connect to {addr} timed out"))),
    }
}

#[cfg(target_os = "linux")]
fn bind_to_interface(socket: &Socket, iface: &Interface, _addr: &SocketAddr) -> Result<()> {
    socket
        .bind_device(Some(iface.name.as_bytes()))
        .map_err(Error::Io)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn bind_to_interface(socket: &Socket, iface: &Interface, addr: &SocketAddr) -> Result<()> {
    let index = std::num::NonZeroU32::new(iface.index);
    match addr {
        SocketAddr::V4(_) => socket.bind_device_by_index_v4(index),
        SocketAddr::V6(_) => socket.bind_device_by_index_v6(index),
    }
    .map_err(Error::Io)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
fn bind_to_interface(_socket: &Socket, _iface: &Interface, _addr: &SocketAddr) -> Result<()> {
    Err(Error::unsupported("interface-bound sockets"))
}
