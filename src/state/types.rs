use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Interface flag bits as reported by the kernel. The values below are
/// identical on Linux and Darwin, which lets tests build flag words without
/// reaching for libc.
pub mod if_flags {
    pub const IFF_UP: u32 = 0x1; // Interface is up
    pub const IFF_BROADCAST: u32 = 0x2; // Broadcast address valid
    pub const IFF_LOOPBACK: u32 = 0x8; // Is a loopback net
    pub const IFF_POINTOPOINT: u32 = 0x10; // Interface is point-to-point link
    pub const IFF_RUNNING: u32 = 0x40; // Resources allocated
    pub const IFF_MULTICAST: u32 = 0x8000; // Supports multicast
}

/// An OS-reported network interface descriptor.
///
/// Identity is the hardware `index`; equality compares every descriptive
/// field so a snapshot diff notices renames, flag flips, and MTU changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Kernel interface index (e.g. the value `if_nametoindex` returns).
    pub index: u32,
    /// Interface name (e.g. "eth0", "en0", "wlan0").
    pub name: String,
    /// Raw interface flags, see [`if_flags`].
    pub flags: u32,
    /// Maximum transmission unit in bytes, 0 if unknown.
    pub mtu: u32,
}

impl Interface {
    pub fn is_up(&self) -> bool {
        self.flags & if_flags::IFF_UP != 0
    }

    pub fn is_running(&self) -> bool {
        self.flags & if_flags::IFF_RUNNING != 0
    }

    pub fn is_loopback(&self) -> bool {
        self.flags & if_flags::IFF_LOOPBACK != 0
    }

    pub fn is_point_to_point(&self) -> bool {
        self.flags & if_flags::IFF_POINTOPOINT != 0
    }
}

/// Mapping from interface name to the IP prefixes assigned to it.
///
/// Only ever replaced wholesale by a fresh snapshot, never mutated in place.
pub type InterfaceAddressSet = HashMap<String, Vec<IpNet>>;

/// A point-in-time, immutable record of the machine's network attachment.
///
/// Two states compare by full structural equality. Once a `State` is stored
/// as the monitor's current state it is only ever replaced, not mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// All interfaces visible to the OS, keyed by name.
    pub interfaces: HashMap<String, Interface>,
    /// IP prefixes per interface name.
    pub interface_ips: InterfaceAddressSet,
    /// Name of the interface carrying the default route, empty if none.
    pub default_route_interface: String,
    /// Whether any usable IPv4 address is present on an up, non-self interface.
    pub have_v4: bool,
    /// Whether any usable IPv6 address is present on an up, non-self interface.
    pub have_v6: bool,
    /// Whether the current attachment is metered/expensive (e.g. cellular).
    pub is_expensive: bool,
    /// HTTP proxy in effect, empty if none.
    pub http_proxy: String,
    /// Proxy auto-config URL in effect, empty if none.
    pub pac: String,
}

impl State {
    /// The prefixes assigned to `name`, or an empty slice if unknown.
    pub fn addrs_for(&self, name: &str) -> &[IpNet] {
        self.interface_ips.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any non-loopback interface is up and running.
    pub fn any_interface_up(&self) -> bool {
        self.interfaces
            .values()
            .any(|i| i.is_up() && i.is_running() && !i.is_loopback())
    }
}

/// Reports whether `ip` is an IPv4 address usable as a source for off-host
/// traffic: not loopback, not 169.254.0.0/16 link-local.
pub fn is_usable_v4(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local(),
        IpAddr::V6(_) => false,
    }
}

/// Reports whether `ip` is an IPv6 address usable as a source for off-host
/// traffic: a global or unique-local unicast address.
pub fn is_usable_v6(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => false,
        IpAddr::V6(v6) => {
            !v6.is_loopback()
                && !v6.is_unspecified()
                && !v6.is_multicast()
                // fe80::/10 link-local unicast
                && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

/// Reports whether `ip` is a link-local multicast address (224.0.0.0/24 for
/// IPv4, ff02::/16 scope for IPv6). These flap constantly and are never an
/// interesting change.
pub fn is_link_local_multicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 224 && o[1] == 0 && o[2] == 0
        }
        IpAddr::V6(v6) => v6.is_multicast() && (v6.segments()[0] & 0x000f) == 0x2,
    }
}

/// Reports whether `ip` is a global unicast address in the loose sense used
/// for probe candidate selection: neither unspecified, loopback, multicast,
/// nor link-local.
pub fn is_global_unicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !v4.is_unspecified() && !v4.is_loopback() && !v4.is_multicast() && !v4.is_link_local()
        }
        IpAddr::V6(v6) => {
            !v6.is_unspecified()
                && !v6.is_loopback()
                && !v6.is_multicast()
                && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

/// Reports whether `ip` is an RFC 1918 private IPv4 address.
pub fn is_private_v4(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(_) => false,
    }
}
