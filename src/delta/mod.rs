//! Structured comparison of two network-state snapshots.
//!
//! [`ChangeDelta`] is computed fresh from an (old, new) pair, published to
//! subscribers, and discarded; it is never stored by the monitor.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use ipnet::IpNet;
use serde::Serialize;

use crate::state::{is_link_local_multicast, is_usable_v4, is_usable_v6, Interface, State};

/// Predicate deciding whether an interface (with its routable prefixes) is
/// worth paying attention to when diffing. When absent, all interfaces are
/// considered interesting.
pub type InterestingInterfaceFn = dyn Fn(&Interface, &[IpNet]) -> bool + Send + Sync;

/// The difference between two network states, with eagerly computed
/// comparison flags.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeDelta {
    /// The old state, if known. Read-only.
    pub old: Option<Arc<State>>,
    /// The new state. Always present. Read-only.
    pub new: Arc<State>,
    /// Whether wall time jumped since the last check, hinting that a
    /// sleeping device woke back up.
    pub time_jumped: bool,
    /// The mesh client's own interface name, if known. Its changes are
    /// excluded from interest comparisons.
    pub self_interface: Option<String>,

    /// Whether the default route interface changed.
    pub default_interface_changed: bool,
    /// Whether the new state is less expensive than the old.
    pub is_less_expensive: bool,
    /// Whether the PAC or HTTP proxy configuration changed.
    pub proxy_changed: bool,
    /// Whether any interface IPs changed in a meaningful way.
    pub interface_ips_changed: bool,
    /// Whether IPv4/IPv6 availability flipped.
    pub available_protocols_changed: bool,

    /// Whether this change likely requires consumers to rebind sockets.
    /// A deliberately conservative verdict: it covers a number of cases
    /// where a rebind is not strictly necessary. Treat it as a hint; if in
    /// doubt, rebind.
    pub rebind_likely_required: bool,
}

impl ChangeDelta {
    /// Builds a delta with all interfaces considered interesting.
    pub fn new(
        old: Option<Arc<State>>,
        new: Arc<State>,
        time_jumped: bool,
        self_interface: Option<&str>,
    ) -> Self {
        Self::with_filter(old, new, time_jumped, self_interface, None)
    }

    /// Builds a delta, consulting `interesting` to exclude interfaces from
    /// the IP-change comparison.
    pub fn with_filter(
        old: Option<Arc<State>>,
        new: Arc<State>,
        time_jumped: bool,
        self_interface: Option<&str>,
        interesting: Option<&InterestingInterfaceFn>,
    ) -> Self {
        let mut delta = ChangeDelta {
            old,
            new,
            time_jumped,
            self_interface: self_interface.map(str::to_string),
            default_interface_changed: false,
            is_less_expensive: false,
            proxy_changed: false,
            interface_ips_changed: false,
            available_protocols_changed: false,
            rebind_likely_required: false,
        };

        match delta.old.as_deref() {
            None => {
                // Transition from nothing: no baseline to compare against.
                delta.default_interface_changed = !delta.new.default_route_interface.is_empty();
                delta.is_less_expensive = false;
                delta.proxy_changed = true;
                delta.interface_ips_changed = true;
            }
            Some(old) => {
                delta.available_protocols_changed =
                    old.have_v4 != delta.new.have_v4 || old.have_v6 != delta.new.have_v6;
                delta.default_interface_changed =
                    old.default_route_interface != delta.new.default_route_interface;
                delta.is_less_expensive = old.is_expensive && !delta.new.is_expensive;
                delta.proxy_changed =
                    old.pac != delta.new.pac || old.http_proxy != delta.new.http_proxy;
                delta.interface_ips_changed = interesting_interface_change(
                    old,
                    &delta.new,
                    self_interface,
                    interesting,
                );
            }
        }

        // Several of these checks are redundant (an interface-IP change
        // usually comes with one of the others), but keeping them all makes
        // the verdict easy to reason about and test.
        delta.rebind_likely_required = delta.old.is_none()
            || delta.time_jumped
            || delta.default_interface_changed
            || delta.interface_ips_changed
            || delta.is_less_expensive
            || delta.proxy_changed
            || delta.available_protocols_changed;

        delta
    }
}

/// Reports whether any interface changed in a meaningful way between `old`
/// and `new`. The mesh client's own interface is excluded, as are
/// interfaces with no routable address on either side: an interface
/// appearing or disappearing only matters if it carried an address
/// something could have been bound to.
fn interesting_interface_change(
    old: &State,
    new: &State,
    self_interface: Option<&str>,
    interesting: Option<&InterestingInterfaceFn>,
) -> bool {
    // Compare in both directions so appearances and disappearances are both
    // caught.
    one_sided_change(old, new, self_interface, interesting)
        || one_sided_change(new, old, self_interface, interesting)
}

fn one_sided_change(
    a: &State,
    b: &State,
    self_interface: Option<&str>,
    interesting: Option<&InterestingInterfaceFn>,
) -> bool {
    for (name, a_iface) in &a.interfaces {
        if Some(name.as_str()) == self_interface {
            continue;
        }
        let a_ips = filter_routable(a.addrs_for(name));
        if let Some(pred) = interesting {
            if !pred(a_iface, &a_ips) {
                continue;
            }
        }
        if a_ips.is_empty() {
            continue;
        }

        let Some(b_iface) = b.interfaces.get(name) else {
            return true;
        };
        let Some(b_ips_raw) = b.interface_ips.get(name) else {
            return true;
        };
        let b_ips = filter_routable(b_ips_raw);

        if a_iface != b_iface || !prefix_sets_equal(&a_ips, &b_ips) {
            return true;
        }
    }
    false
}

/// Keeps only prefixes whose address could carry off-host traffic,
/// dropping link-local multicast noise.
fn filter_routable(prefixes: &[IpNet]) -> Vec<IpNet> {
    prefixes
        .iter()
        .filter(|net| {
            let addr = net.addr();
            !is_link_local_multicast(&addr) && (is_usable_v4(&addr) || is_usable_v6(&addr))
        })
        .copied()
        .collect()
}

/// Set equality over prefixes, ignoring order.
fn prefix_sets_equal(a: &[IpNet], b: &[IpNet]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}
