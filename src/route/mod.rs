//! Default-route and gateway lookup.
//!
//! Answers two questions the monitor and prober need: which interface
//! carries the default route, and what the default gateway's address is.
//! Linux reads the kernel's route table from procfs; Darwin dumps the
//! routing table over `sysctl(NET_RT_FLAGS)`.

use std::net::IpAddr;

use crate::error::Result;
use crate::state::{is_private_v4, State};

/// The machine's default route, as far as the kernel reports one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRoute {
    /// Interface name the route egresses through.
    pub interface: String,
    /// Next-hop address, if the route has one.
    pub gateway: Option<IpAddr>,
}

/// Returns the current default route, or `None` if the machine has none.
pub fn default_route() -> Result<Option<DefaultRoute>> {
    sys::default_route()
}

/// Returns the default gateway and the machine's own address facing it.
///
/// Only answers for home-network-shaped topologies: the gateway must be a
/// private IPv4 address and one of the default interface's prefixes must
/// contain it. The monitor caches this per network change.
pub fn likely_home_router_ip(state: &State) -> Option<(IpAddr, IpAddr)> {
    let route = default_route().ok().flatten()?;
    let gw = route.gateway?;
    if !is_private_v4(&gw) {
        return None;
    }
    state
        .addrs_for(&route.interface)
        .iter()
        .find(|net| net.addr().is_ipv4() && net.contains(&gw))
        .map(|net| (gw, net.addr()))
}

#[cfg(target_os = "linux")]
mod sys {
    use std::fs;
    use std::net::{IpAddr, Ipv4Addr};

    use super::DefaultRoute;
    use crate::error::Result;

    const RTF_UP: u32 = 0x0001;

    pub(super) fn default_route() -> Result<Option<DefaultRoute>> {
        let content = fs::read_to_string("/proc/net/route")?;
        Ok(parse_route_table(&content))
    }

    /// Parses the procfs IPv4 route table, returning the first up route
    /// with a zero destination and mask.
    pub(super) fn parse_route_table(content: &str) -> Option<DefaultRoute> {
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                continue;
            }
            let parsed = (
                u32::from_str_radix(fields[1], 16),
                u32::from_str_radix(fields[7], 16),
                u32::from_str_radix(fields[3], 16),
            );
            let (destination, mask, flags) = match parsed {
                (Ok(d), Ok(m), Ok(f)) => (d, m, f),
                _ => continue,
            };
            if destination != 0 || mask != 0 || flags & RTF_UP == 0 {
                continue;
            }
            let gateway = u32::from_str_radix(fields[2], 16)
                .ok()
                .filter(|&g| g != 0)
                // procfs prints the big-endian word with bytes reversed
                .map(|g| IpAddr::V4(Ipv4Addr::from(g.to_le_bytes())));
            return Some(DefaultRoute {
                interface: fields[0].to_string(),
                gateway,
            });
        }
        None
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SAMPLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t000011AC\t00000000\t0001\t0\t0\t0\t0000FFFF\t0\t0\t0
eth0\t00000000\t010011AC\t0003\t0\t0\t0\t00000000\t0\t0\t0
";

        #[test]
        fn test_parse_route_table_default() {
            let route = parse_route_table(SAMPLE).expect("default route");
            assert_eq!(route.interface, "eth0");
            assert_eq!(route.gateway, Some(IpAddr::V4(Ipv4Addr::new(172, 17, 0, 1))));
        }

        #[test]
        fn test_parse_route_table_no_default() {
            let content = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t000011AC\t00000000\t0001\t0\t0\t0\t0000FFFF\t0\t0\t0
";
            assert!(parse_route_table(content).is_none());
        }

        #[test]
        fn test_parse_route_table_skips_down_routes() {
            let content = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth1\t00000000\t010011AC\t0002\t0\t0\t0\t00000000\t0\t0\t0
";
            assert!(parse_route_table(content).is_none());
        }
    }
}

#[cfg(target_os = "macos")]
mod sys {
    use std::ffi::CStr;
    use std::io;
    use std::mem;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::ptr;

    use super::DefaultRoute;
    use crate::error::{Error, Result};

    const RTA_DST: i32 = 0x1;
    const RTA_GATEWAY: i32 = 0x2;
    const RTAX_MAX: usize = 8;

    pub(super) fn default_route() -> Result<Option<DefaultRoute>> {
        let buf = route_table_dump()?;
        let mut off = 0usize;
        while off + mem::size_of::<libc::rt_msghdr>() <= buf.len() {
            // Safety: off is bounds-checked against the sysctl-reported
            // length and rt_msghdr is repr(C) plain data.
            let rtm = unsafe { &*(buf.as_ptr().add(off) as *const libc::rt_msghdr) };
            let msglen = rtm.rtm_msglen as usize;
            if msglen == 0 || off + msglen > buf.len() {
                break;
            }
            if rtm.rtm_version as i32 == libc::RTM_VERSION
                && rtm.rtm_flags & libc::RTF_UP != 0
                && rtm.rtm_flags & libc::RTF_GATEWAY != 0
            {
                let payload = &buf[off + mem::size_of::<libc::rt_msghdr>()..off + msglen];
                let (dst, gateway) = parse_route_addrs(payload, rtm.rtm_addrs);
                if matches!(dst, Some(d) if d.is_unspecified()) {
                    if let Some(name) = interface_name(rtm.rtm_index as u32) {
                        return Ok(Some(DefaultRoute { interface: name, gateway }));
                    }
                }
            }
            off += msglen;
        }
        Ok(None)
    }

    fn route_table_dump() -> Result<Vec<u8>> {
        let mut mib: [libc::c_int; 6] = [
            libc::CTL_NET,
            libc::PF_ROUTE,
            0,
            0, // all address families
            libc::NET_RT_FLAGS,
            libc::RTF_GATEWAY,
        ];
        unsafe {
            let mut len: libc::size_t = 0;
            if libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as libc::c_uint,
                ptr::null_mut(),
                &mut len,
                ptr::null_mut(),
                0,
            ) != 0
            {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            let mut buf = vec![0u8; len];
            if libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as libc::c_uint,
                buf.as_mut_ptr() as *mut libc::c_void,
                &mut len,
                ptr::null_mut(),
                0,
            ) != 0
            {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            buf.truncate(len);
            Ok(buf)
        }
    }

    /// Walks the packed sockaddr list following an rt_msghdr, pulling out
    /// the destination and gateway addresses.
    fn parse_route_addrs(payload: &[u8], rtm_addrs: i32) -> (Option<IpAddr>, Option<IpAddr>) {
        let mut dst = None;
        let mut gateway = None;
        let mut off = 0usize;
        for i in 0..RTAX_MAX {
            if rtm_addrs & (1 << i) == 0 {
                continue;
            }
            if off + mem::size_of::<libc::sockaddr>() > payload.len() {
                break;
            }
            let sa = unsafe { &*(payload.as_ptr().add(off) as *const libc::sockaddr) };
            let addr = sockaddr_ip(sa, &payload[off..]);
            match 1 << i {
                RTA_DST => dst = addr,
                RTA_GATEWAY => gateway = addr,
                _ => {}
            }
            // sockaddrs are packed with 4-byte rounding; an sa_len of 0
            // still occupies one slot.
            let sa_len = sa.sa_len as usize;
            off += if sa_len == 0 { 4 } else { (sa_len + 3) & !3 };
        }
        (dst, gateway)
    }

    fn sockaddr_ip(sa: &libc::sockaddr, raw: &[u8]) -> Option<IpAddr> {
        match sa.sa_family as libc::c_int {
            libc::AF_INET if raw.len() >= mem::size_of::<libc::sockaddr_in>() => {
                let sin = unsafe { &*(raw.as_ptr() as *const libc::sockaddr_in) };
                Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))))
            }
            libc::AF_INET6 if raw.len() >= mem::size_of::<libc::sockaddr_in6>() => {
                let sin6 = unsafe { &*(raw.as_ptr() as *const libc::sockaddr_in6) };
                Some(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)))
            }
            _ => None,
        }
    }

    fn interface_name(index: u32) -> Option<String> {
        if index == 0 {
            return None;
        }
        let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
        let name = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
        if name.is_null() {
            return None;
        }
        unsafe { CStr::from_ptr(name) }.to_str().ok().map(str::to_string)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod sys {
    use super::DefaultRoute;
    use crate::error::Result;

    pub(super) fn default_route() -> Result<Option<DefaultRoute>> {
        Ok(None)
    }
}
