use std::collections::HashMap;
use std::net::IpAddr;

use super::*;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn test_interface_flag_helpers() {
    let iface = Interface {
        index: 2,
        name: "eth0".to_string(),
        flags: if_flags::IFF_UP | if_flags::IFF_RUNNING | if_flags::IFF_BROADCAST,
        mtu: 1500,
    };
    assert!(iface.is_up());
    assert!(iface.is_running());
    assert!(!iface.is_loopback());
    assert!(!iface.is_point_to_point());

    let lo = Interface {
        index: 1,
        name: "lo".to_string(),
        flags: if_flags::IFF_UP | if_flags::IFF_RUNNING | if_flags::IFF_LOOPBACK,
        mtu: 65536,
    };
    assert!(lo.is_loopback());
}

#[test]
fn test_usable_v4_classification() {
    assert!(is_usable_v4(&ip("10.0.0.2")));
    assert!(is_usable_v4(&ip("8.8.8.8")));
    assert!(!is_usable_v4(&ip("127.0.0.1")));
    assert!(!is_usable_v4(&ip("169.254.12.7")));
    assert!(!is_usable_v4(&ip("2001:db8::1")));
}

#[test]
fn test_usable_v6_classification() {
    assert!(is_usable_v6(&ip("2001:db8::5")));
    assert!(is_usable_v6(&ip("fd00::1"))); // unique-local counts
    assert!(!is_usable_v6(&ip("::1")));
    assert!(!is_usable_v6(&ip("fe80::1")));
    assert!(!is_usable_v6(&ip("ff02::fb")));
    assert!(!is_usable_v6(&ip("::")));
    assert!(!is_usable_v6(&ip("10.0.0.2")));
}

#[test]
fn test_link_local_multicast_classification() {
    assert!(is_link_local_multicast(&ip("224.0.0.251")));
    assert!(is_link_local_multicast(&ip("ff02::fb")));
    assert!(!is_link_local_multicast(&ip("224.1.0.1"))); // routable multicast
    assert!(!is_link_local_multicast(&ip("ff05::2"))); // site-local scope
    assert!(!is_link_local_multicast(&ip("10.0.0.2")));
}

#[test]
fn test_global_unicast_classification() {
    assert!(is_global_unicast(&ip("192.168.1.5")));
    assert!(is_global_unicast(&ip("2001:db8::5")));
    assert!(!is_global_unicast(&ip("127.0.0.1")));
    assert!(!is_global_unicast(&ip("fe80::1")));
    assert!(!is_global_unicast(&ip("ff02::1")));
    assert!(!is_global_unicast(&ip("0.0.0.0")));
}

#[test]
fn test_private_v4_classification() {
    assert!(is_private_v4(&ip("10.1.2.3")));
    assert!(is_private_v4(&ip("172.16.99.1")));
    assert!(is_private_v4(&ip("192.168.0.1")));
    assert!(!is_private_v4(&ip("8.8.8.8")));
    assert!(!is_private_v4(&ip("fd00::1")));
}

#[test]
fn test_state_structural_equality() {
    let mut interfaces = HashMap::new();
    interfaces.insert(
        "eth0".to_string(),
        Interface { index: 2, name: "eth0".to_string(), flags: if_flags::IFF_UP, mtu: 1500 },
    );
    let mut interface_ips: InterfaceAddressSet = HashMap::new();
    interface_ips.insert("eth0".to_string(), vec!["10.0.0.2/24".parse().unwrap()]);

    let a = State {
        interfaces,
        interface_ips,
        default_route_interface: "eth0".to_string(),
        have_v4: true,
        have_v6: false,
        is_expensive: false,
        http_proxy: String::new(),
        pac: String::new(),
    };
    let b = a.clone();
    assert_eq!(a, b);

    let mut c = a.clone();
    c.default_route_interface = "wlan0".to_string();
    assert_ne!(a, c);

    let mut d = a.clone();
    d.interfaces.get_mut("eth0").unwrap().mtu = 9000;
    assert_ne!(a, d);
}

#[test]
fn test_addrs_for_unknown_interface_is_empty() {
    let state = State::default();
    assert!(state.addrs_for("nope").is_empty());
}

#[test]
fn test_state_serializes() {
    let mut state = State::default();
    state.default_route_interface = "eth0".to_string();
    state.have_v4 = true;
    let json = serde_json::to_string(&state).expect("serialize");
    let back: State = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(state, back);
}

#[cfg(unix)]
#[test]
fn test_snapshot_reports_loopback() {
    let state = OsSnapshotter::new().snapshot(None).expect("snapshot");
    assert!(
        state.interfaces.values().any(|i| i.is_loopback()),
        "expected a loopback interface in {:?}",
        state.interfaces.keys().collect::<Vec<_>>()
    );
    // Every interface name in the address map has a descriptor.
    for name in state.interface_ips.keys() {
        assert!(state.interfaces.contains_key(name));
    }
}

#[cfg(unix)]
#[test]
fn test_snapshot_is_independent_per_call() {
    let snapshotter = OsSnapshotter::new();
    let a = snapshotter.snapshot(None).expect("snapshot");
    let mut b = snapshotter.snapshot(None).expect("snapshot");
    b.default_route_interface = "mutated".to_string();
    // Mutating one snapshot never affects the other.
    assert_ne!(a.default_route_interface, "mutated");
}
