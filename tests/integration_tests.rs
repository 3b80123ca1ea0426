use std::sync::Arc;

use linkwatch::{
    find_interface_that_can_reach, ChangeDelta, Interface, Monitor, Network, ProbeOptions,
    Result,
};

#[cfg(unix)]
#[test]
fn test_snapshot_through_public_api() -> Result<()> {
    use linkwatch::{OsSnapshotter, Snapshotter};

    let state = OsSnapshotter::new().snapshot(None)?;
    assert!(!state.interfaces.is_empty());
    Ok(())
}

#[test]
fn test_identical_states_never_require_rebind() {
    let monitor = Monitor::new_static();
    let state = monitor.interface_state();
    let delta = ChangeDelta::new(Some(Arc::clone(&state)), state, false, None);
    assert!(!delta.rebind_likely_required);
}

#[test]
fn test_unknown_old_state_always_requires_rebind() {
    let monitor = Monitor::new_static();
    let delta = ChangeDelta::new(None, monitor.interface_state(), false, None);
    assert!(delta.rebind_likely_required);
}

#[tokio::test]
async fn test_static_monitor_lifecycle() -> Result<()> {
    let monitor = Monitor::new_static();
    let handle = monitor.register_change_callback(|_| unreachable!("static monitor dispatched"));
    monitor.start();
    monitor.inject_event();
    monitor.poll();
    handle.unregister();
    monitor.close().await?;
    monitor.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_probing_with_no_eligible_candidates() -> Result<()> {
    // Loopback is excluded by the candidate rules and everything else is
    // rejected by the filter, so this must be a clean "no interface" answer.
    let mut opts = ProbeOptions::new(Network::Tcp4, "127.0.0.1", 1);
    opts.filter = Some(Box::new(|_: &Interface| false));
    let found = find_interface_that_can_reach(&opts).await?;
    assert!(found.is_none());
    Ok(())
}
