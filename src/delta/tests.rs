use std::collections::HashMap;
use std::sync::Arc;

use super::*;
use crate::state::{if_flags, Interface, State};

const UP: u32 = if_flags::IFF_UP | if_flags::IFF_RUNNING;

fn make_state(entries: &[(&str, u32, &[&str])], default_route: &str) -> State {
    let mut interfaces = HashMap::new();
    let mut interface_ips = HashMap::new();
    for (name, index, prefixes) in entries {
        interfaces.insert(
            name.to_string(),
            Interface {
                index: *index,
                name: name.to_string(),
                flags: UP,
                mtu: 1500,
            },
        );
        interface_ips.insert(
            name.to_string(),
            prefixes.iter().map(|p| p.parse().unwrap()).collect(),
        );
    }
    State {
        interfaces,
        interface_ips,
        default_route_interface: default_route.to_string(),
        have_v4: true,
        have_v6: false,
        is_expensive: false,
        http_proxy: String::new(),
        pac: String::new(),
    }
}

#[test]
fn test_noop_diff_requires_no_rebind() {
    let state = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let delta = ChangeDelta::new(Some(Arc::clone(&state)), state, false, None);
    assert!(!delta.rebind_likely_required);
    assert!(!delta.default_interface_changed);
    assert!(!delta.interface_ips_changed);
    assert!(!delta.proxy_changed);
    assert!(!delta.available_protocols_changed);
    assert!(!delta.is_less_expensive);
}

#[test]
fn test_from_nothing_always_requires_rebind() {
    let state = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let delta = ChangeDelta::new(None, state, false, None);
    assert!(delta.rebind_likely_required);
    assert!(delta.default_interface_changed);
    assert!(delta.interface_ips_changed);
    assert!(delta.proxy_changed);
    assert!(!delta.is_less_expensive);
}

#[test]
fn test_from_nothing_without_default_route() {
    let state = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], ""));
    let delta = ChangeDelta::new(None, state, false, None);
    assert!(!delta.default_interface_changed);
    assert!(delta.rebind_likely_required);
}

#[test]
fn test_default_route_change() {
    let old = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("wlan0", 3, &["192.168.1.5/24"])],
        "eth0",
    ));
    let new = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("wlan0", 3, &["192.168.1.5/24"])],
        "wlan0",
    ));
    let delta = ChangeDelta::new(Some(old), new, false, None);
    assert!(delta.default_interface_changed);
    assert!(delta.rebind_likely_required);
    assert!(!delta.interface_ips_changed);
}

#[test]
fn test_self_interface_changes_are_ignored() {
    let old = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("mesh0", 7, &["100.64.0.1/32"])],
        "eth0",
    ));
    let new = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("mesh0", 7, &["100.64.0.9/32"])],
        "eth0",
    ));
    let delta = ChangeDelta::new(Some(old), new, false, Some("mesh0"));
    assert!(!delta.interface_ips_changed);
    assert!(!delta.rebind_likely_required);
}

#[test]
fn test_link_local_multicast_never_interesting() {
    let old = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let new = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("mc0", 9, &["224.0.0.251/32", "ff02::fb/128"])],
        "eth0",
    ));
    let delta = ChangeDelta::new(Some(old), new, false, None);
    assert!(!delta.interface_ips_changed);
}

#[test]
fn test_prefix_order_is_irrelevant() {
    let old = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24", "192.168.1.2/24"])],
        "eth0",
    ));
    let new = Arc::new(make_state(
        &[("eth0", 2, &["192.168.1.2/24", "10.0.0.2/24"])],
        "eth0",
    ));
    let delta = ChangeDelta::new(Some(old), new, false, None);
    assert!(!delta.interface_ips_changed);
    assert!(!delta.rebind_likely_required);
}

#[test]
fn test_interface_with_routable_addr_vanishing_is_interesting() {
    let old = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("eth1", 3, &["172.16.0.2/16"])],
        "eth0",
    ));
    let new = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let delta = ChangeDelta::new(Some(old), new, false, None);
    assert!(delta.interface_ips_changed);
    assert!(delta.rebind_likely_required);
}

#[test]
fn test_interface_without_routable_addr_is_not_interesting() {
    let old = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("eth1", 3, &["fe80::1/64"])],
        "eth0",
    ));
    let new = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let delta = ChangeDelta::new(Some(old), new, false, None);
    assert!(!delta.interface_ips_changed);
}

#[test]
fn test_new_interface_with_routable_addr_is_interesting() {
    let old = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let new = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("usb0", 5, &["192.168.42.17/24"])],
        "eth0",
    ));
    let delta = ChangeDelta::new(Some(old), new, false, None);
    assert!(delta.interface_ips_changed);
}

#[test]
fn test_mtu_change_is_interesting() {
    let old = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let mut changed = make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0");
    changed.interfaces.get_mut("eth0").unwrap().mtu = 9000;
    let delta = ChangeDelta::new(Some(old), Arc::new(changed), false, None);
    assert!(delta.interface_ips_changed);
}

#[test]
fn test_became_less_expensive() {
    let mut old = make_state(&[("pdp0", 4, &["10.1.2.3/32"])], "pdp0");
    old.is_expensive = true;
    let new = make_state(&[("pdp0", 4, &["10.1.2.3/32"])], "pdp0");
    let delta = ChangeDelta::new(Some(Arc::new(old)), Arc::new(new), false, None);
    assert!(delta.is_less_expensive);
    assert!(delta.rebind_likely_required);
}

#[test]
fn test_becoming_more_expensive_is_not_less_expensive() {
    let old = make_state(&[("en0", 4, &["10.1.2.3/24"])], "en0");
    let mut new = make_state(&[("en0", 4, &["10.1.2.3/24"])], "en0");
    new.is_expensive = true;
    let delta = ChangeDelta::new(Some(Arc::new(old)), Arc::new(new), false, None);
    assert!(!delta.is_less_expensive);
}

#[test]
fn test_proxy_change_requires_rebind() {
    let old = make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0");
    let mut new = make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0");
    new.http_proxy = "http://proxy.corp:3128".to_string();
    let delta = ChangeDelta::new(Some(Arc::new(old)), Arc::new(new), false, None);
    assert!(delta.proxy_changed);
    assert!(delta.rebind_likely_required);
}

#[test]
fn test_protocol_availability_change() {
    let old = make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0");
    let mut new = make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0");
    new.have_v6 = true;
    let delta = ChangeDelta::new(Some(Arc::new(old)), Arc::new(new), false, None);
    assert!(delta.available_protocols_changed);
    assert!(delta.rebind_likely_required);
}

#[test]
fn test_time_jump_alone_requires_rebind() {
    let state = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let delta = ChangeDelta::new(Some(Arc::clone(&state)), state, true, None);
    assert!(delta.time_jumped);
    assert!(delta.rebind_likely_required);
    assert!(!delta.interface_ips_changed);
}

#[test]
fn test_interesting_filter_excludes_interfaces() {
    let old = Arc::new(make_state(&[("eth0", 2, &["10.0.0.2/24"])], "eth0"));
    let new = Arc::new(make_state(
        &[("eth0", 2, &["10.0.0.2/24"]), ("docker0", 8, &["172.17.0.1/16"])],
        "eth0",
    ));
    let not_docker = |iface: &Interface, _ips: &[ipnet::IpNet]| !iface.name.starts_with("docker");
    let delta = ChangeDelta::with_filter(
        Some(old),
        new,
        false,
        None,
        Some(&not_docker as &InterestingInterfaceFn),
    );
    assert!(!delta.interface_ips_changed);
}
