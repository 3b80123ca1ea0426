//! Immutable snapshots of the machine's network attachment.
//!
//! [`OsSnapshotter`] queries the OS for interfaces, their addresses, the
//! default-route interface, and proxy configuration, and assembles them into
//! a point-in-time [`State`] value. Each call returns a fresh, independently
//! owned snapshot; it is safe to call repeatedly and concurrently.

mod types;

#[cfg(test)]
mod tests;

use std::env;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::route;

pub use types::{
    if_flags, is_global_unicast, is_link_local_multicast, is_private_v4, is_usable_v4,
    is_usable_v6, Interface, InterfaceAddressSet, State,
};

/// Classifier deciding whether a snapshot represents an expensive (metered)
/// attachment. Platform layers that can tell cellular from Wi-Fi supply one;
/// the default classifies nothing as expensive.
pub type ExpenseClassifier = dyn Fn(&State) -> bool + Send + Sync;

/// Capability seam for producing [`State`] snapshots, so tests can substitute
/// a deterministic source of states for the monitor.
#[cfg_attr(test, mockall::automock)]
pub trait Snapshotter: Send + Sync {
    /// Builds a fresh snapshot. `self_iface` is the mesh client's own
    /// interface name, excluded from protocol-availability accounting.
    fn snapshot<'a>(&self, self_iface: Option<&'a str>) -> Result<State>;
}

/// The production [`Snapshotter`] backed by OS queries.
#[derive(Default)]
pub struct OsSnapshotter {
    classify_expensive: Option<Arc<ExpenseClassifier>>,
}

impl OsSnapshotter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an expense classifier consulted on every snapshot.
    pub fn with_expense_classifier(classify: Arc<ExpenseClassifier>) -> Self {
        Self { classify_expensive: Some(classify) }
    }
}

impl Snapshotter for OsSnapshotter {
    fn snapshot(&self, self_iface: Option<&str>) -> Result<State> {
        let (interfaces, interface_ips) = sys::enumerate_interfaces()?;

        let default_route_interface = match route::default_route()? {
            Some(r) => r.interface,
            None => String::new(),
        };

        let mut have_v4 = false;
        let mut have_v6 = false;
        for (name, iface) in &interfaces {
            if !iface.is_up() {
                continue;
            }
            if Some(name.as_str()) == self_iface {
                continue;
            }
            for net in interface_ips.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                let addr = net.addr();
                have_v4 = have_v4 || is_usable_v4(&addr);
                have_v6 = have_v6 || is_usable_v6(&addr);
            }
        }

        let (http_proxy, pac) = proxy_config();
        let mut state = State {
            interfaces,
            interface_ips,
            default_route_interface,
            have_v4,
            have_v6,
            is_expensive: false,
            http_proxy,
            pac,
        };
        if let Some(classify) = &self.classify_expensive {
            state.is_expensive = classify(&state);
        }

        debug!(
            interfaces = state.interfaces.len(),
            default_route = %state.default_route_interface,
            have_v4 = state.have_v4,
            have_v6 = state.have_v6,
            "captured interface snapshot"
        );
        Ok(state)
    }
}

/// Reads the proxy configuration in effect. On Unix this is the conventional
/// environment variables; there is no PAC equivalent.
fn proxy_config() -> (String, String) {
    let http_proxy = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"]
        .iter()
        .find_map(|key| env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default();
    (http_proxy, String::new())
}

/// Enumerates current interfaces and their address sets without building a
/// full snapshot. Used by the reachability prober, which has no need for
/// route or proxy data.
pub(crate) fn enumerate_interfaces(
) -> Result<(std::collections::HashMap<String, Interface>, InterfaceAddressSet)> {
    sys::enumerate_interfaces()
}

#[cfg(unix)]
mod sys {
    use std::collections::HashMap;
    use std::ffi::CStr;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::ptr;

    use ipnet::IpNet;

    use super::{Interface, InterfaceAddressSet};
    use crate::error::{Error, Result};

    /// Walks the `getifaddrs` linked list into descriptor and address maps.
    pub(super) fn enumerate_interfaces(
    ) -> Result<(HashMap<String, Interface>, InterfaceAddressSet)> {
        let mut interfaces: HashMap<String, Interface> = HashMap::new();
        let mut interface_ips: InterfaceAddressSet = HashMap::new();

        let mtu_fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        let _fd_guard = scopeguard::guard(mtu_fd, |fd| {
            if fd >= 0 {
                unsafe { libc::close(fd) };
            }
        });

        unsafe {
            let mut ifap: *mut libc::ifaddrs = ptr::null_mut();
            if libc::getifaddrs(&mut ifap) != 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            let _guard = scopeguard::guard(ifap, |ifap| {
                libc::freeifaddrs(ifap);
            });

            let mut current = ifap;
            while !current.is_null() {
                let ifa = &*current;
                current = ifa.ifa_next;

                if ifa.ifa_name.is_null() {
                    continue;
                }
                let name = match CStr::from_ptr(ifa.ifa_name).to_str() {
                    Ok(s) if !s.is_empty() => s.to_string(),
                    _ => continue,
                };

                if !interfaces.contains_key(&name) {
                    let index = libc::if_nametoindex(ifa.ifa_name);
                    let mtu = interface_mtu(mtu_fd, ifa.ifa_name);
                    interfaces.insert(
                        name.clone(),
                        Interface {
                            index,
                            name: name.clone(),
                            flags: ifa.ifa_flags as u32,
                            mtu,
                        },
                    );
                    interface_ips.entry(name.clone()).or_default();
                }

                if ifa.ifa_addr.is_null() {
                    continue;
                }
                let family = (*ifa.ifa_addr).sa_family as libc::c_int;
                let prefix = match family {
                    libc::AF_INET => {
                        let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                        let len = v4_prefix_len(ifa.ifa_netmask);
                        IpNet::new(IpAddr::V4(ip), len).ok()
                    }
                    libc::AF_INET6 => {
                        let sin6 = &*(ifa.ifa_addr as *const libc::sockaddr_in6);
                        let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                        let len = v6_prefix_len(ifa.ifa_netmask);
                        IpNet::new(IpAddr::V6(ip), len).ok()
                    }
                    _ => None,
                };
                if let Some(net) = prefix {
                    interface_ips.entry(name).or_default().push(net);
                }
            }
        }

        Ok((interfaces, interface_ips))
    }

    unsafe fn v4_prefix_len(mask: *const libc::sockaddr) -> u8 {
        if mask.is_null() || (*mask).sa_family as libc::c_int != libc::AF_INET {
            return 32;
        }
        let sin = &*(mask as *const libc::sockaddr_in);
        u32::from_be(sin.sin_addr.s_addr).count_ones() as u8
    }

    unsafe fn v6_prefix_len(mask: *const libc::sockaddr) -> u8 {
        if mask.is_null() || (*mask).sa_family as libc::c_int != libc::AF_INET6 {
            return 128;
        }
        let sin6 = &*(mask as *const libc::sockaddr_in6);
        sin6.sin6_addr
            .s6_addr
            .iter()
            .map(|b| b.count_ones() as u8)
            .sum()
    }

    /// Queries the MTU for `name` via SIOCGIFMTU, 0 on failure.
    fn interface_mtu(fd: libc::c_int, name: *const libc::c_char) -> u32 {
        if fd < 0 {
            return 0;
        }
        unsafe {
            let mut req: libc::ifreq = std::mem::zeroed();
            let name = CStr::from_ptr(name);
            let bytes = name.to_bytes();
            if bytes.len() >= req.ifr_name.len() {
                return 0;
            }
            for (dst, src) in req.ifr_name.iter_mut().zip(bytes) {
                *dst = *src as libc::c_char;
            }
            if libc::ioctl(fd, libc::SIOCGIFMTU as _, &mut req as *mut libc::ifreq) == 0 {
                req.ifr_ifru.ifru_mtu as u32
            } else {
                0
            }
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::collections::HashMap;

    use super::{Interface, InterfaceAddressSet};
    use crate::error::{Error, Result};

    pub(super) fn enumerate_interfaces(
    ) -> Result<(HashMap<String, Interface>, InterfaceAddressSet)> {
        Err(Error::unsupported("interface enumeration"))
    }
}
