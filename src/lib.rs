//! Linkwatch - network attachment monitoring for Rust
//!
//! This crate lets a networked client detect, in real time, that its
//! machine's network attachment changed (new Wi-Fi, cable unplugged, laptop
//! woke from sleep, VPN interface appeared) and decide which local interface
//! should be used to reach a given destination when several are available.
//!
//! # Features
//!
//! - **Change Monitoring**: a background [`Monitor`] drains platform change
//!   notifications (rtnetlink on Linux, the routing socket on macOS),
//!   coalesces bursts, re-snapshots the interface state, and dispatches a
//!   structured [`ChangeDelta`] to registered callbacks
//! - **Snapshots**: immutable [`State`] records of interfaces, addresses,
//!   default route, protocol availability, and proxy configuration
//! - **Sleep Detection**: a wall-clock jump poller catches suspend/resume
//!   cycles the OS never reports as link events
//! - **Reachability Probing**: [`find_interface_that_can_reach`] races
//!   bound-socket connections from every plausible interface and picks a
//!   winner within a bounded time window
//!
//! # Examples
//!
//! Watching for changes:
//!
//! ```no_run
//! use linkwatch::{Monitor, MonitorOptions};
//!
//! #[tokio::main]
//! async fn main() -> linkwatch::Result<()> {
//!     let monitor = Monitor::new(MonitorOptions::default())?;
//!     let handle = monitor.register_change_callback(|delta| {
//!         if delta.rebind_likely_required {
//!             println!("network changed; sockets should be rebound");
//!         }
//!     });
//!     monitor.start();
//!     // ... application runs ...
//!     handle.unregister();
//!     monitor.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! Picking an interface for a destination:
//!
//! ```no_run
//! use linkwatch::{find_interface_that_can_reach, Network, ProbeOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> linkwatch::Result<()> {
//! let opts = ProbeOptions::new(Network::Tcp, "example.com", 443);
//! if let Some(iface) = find_interface_that_can_reach(&opts).await? {
//!     println!("reach it via {} (index {})", iface.name, iface.index);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! [`Monitor`] is `Send + Sync`; its stored state is guarded by a single
//! mutex that is never held across snapshotting or callback dispatch.
//! Callbacks run in their own tasks with no ordering guarantees between
//! siblings; deltas themselves are dispatched in the order they were
//! computed.
//!
//! # Error Handling
//!
//! Construction failures (no platform change source, initial snapshot
//! failure) surface from [`Monitor::new`]. Transient receive errors are
//! retried internally with a fixed backoff and never reach subscribers:
//! callbacks only ever see valid, fully formed deltas.

pub mod delta;
pub mod monitor;
pub mod os;
pub mod probe;
pub mod route;
pub mod state;

mod error;

pub use error::{Error, Result};

pub use delta::{ChangeDelta, InterestingInterfaceFn};
pub use monitor::{CallbackHandle, ChangeCallback, Monitor, MonitorOptions};
pub use os::{EventSource, OsEvent};
pub use probe::{
    find_interface_that_can_reach, probe_interfaces_reachability, InetReachability, Network,
    ProbeOptions,
};
pub use state::{Interface, InterfaceAddressSet, OsSnapshotter, Snapshotter, State};

/// Re-export common types for convenience
pub mod prelude {
    pub use crate::delta::ChangeDelta;
    pub use crate::monitor::{Monitor, MonitorOptions};
    pub use crate::probe::{find_interface_that_can_reach, Network, ProbeOptions};
    pub use crate::state::{Interface, State};
    pub use crate::Error;
    pub use crate::Result;
}
