//! The long-lived network change monitor.
//!
//! A [`Monitor`] owns two background tasks: a pump that drains the platform
//! [`EventSource`] and a debounce loop that coalesces change signals,
//! re-snapshots, diffs, and dispatches [`ChangeDelta`]s to subscribers. A
//! third periodic task watches for wall-clock jumps as a backup way to
//! notice a machine waking from sleep, since not every platform reports
//! link changes after resume.


use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::delta::{ChangeDelta, InterestingInterfaceFn};
use crate::error::Result;
use crate::os::{self, EventSource};
use crate::route;
use crate::state::{OsSnapshotter, Snapshotter, State};

/// Quiescence window after handling a change, absorbing bursts of flapping
/// events (undocking a laptop, roaming onto Wi-Fi).
const DEBOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Backoff after an event-source receive error.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How often to compare wall time against the last observation, as a backup
/// mechanism for noticing a sleeping device waking up. Minor network events
/// on wake usually get there first.
const WALL_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Mobile platforms pay for periodic timers in battery and don't sleep the
/// way laptops do, so the wall-clock poller is compiled out there.
const PLATFORM_MONITORS_TIME_JUMPS: bool =
    !cfg!(any(target_os = "android", target_os = "ios"));

/// Callback invoked (in its own task) for every dispatched delta.
pub type ChangeCallback = dyn Fn(&ChangeDelta) + Send + Sync;

/// Construction-time configuration for [`Monitor`].
///
/// Every field is optional; `MonitorOptions::default()` yields a monitor
/// wired to the real OS.
pub struct MonitorOptions {
    /// The mesh client's own interface name ("mesh0", "utun3", ...), if
    /// known. Excluded from interest comparisons and availability counts.
    pub self_interface: Option<String>,
    /// Whether to run the wall-clock jump poller. Ignored on platforms
    /// where the poller is compiled out.
    pub monitor_time_jumps: bool,
    /// Optional predicate narrowing which interfaces are worth diffing.
    pub interesting_interface: Option<Arc<InterestingInterfaceFn>>,
    /// Snapshot source; defaults to the OS-backed snapshotter.
    pub snapshotter: Option<Box<dyn Snapshotter>>,
    /// Change notification source; defaults to the platform listener.
    pub source: Option<Box<dyn EventSource>>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            self_interface: None,
            monitor_time_jumps: true,
            interesting_interface: None,
            snapshotter: None,
            source: None,
        }
    }
}

/// Handle returned by [`Monitor::register_change_callback`]. Unregistering
/// is idempotent and safe to call from within the callback itself.
pub struct CallbackHandle {
    inner: Weak<Inner>,
    id: u64,
}

impl CallbackHandle {
    pub fn unregister(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.mu.lock().callbacks.remove(&self.id);
        }
    }
}

/// A monitoring instance. See the module docs for the task structure.
pub struct Monitor {
    inner: Arc<Inner>,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    snapshotter: Box<dyn Snapshotter>,
    source: Option<Arc<dyn EventSource>>,
    self_interface: Option<String>,
    interesting: Option<Arc<InterestingInterfaceFn>>,
    time_jumps_enabled: bool,
    is_static: bool,
    /// Wakes the debounce task; the actual signal payload lives in
    /// `Guarded::pending` so duplicate signals coalesce.
    notify: Notify,
    changed_tx: broadcast::Sender<ChangeDelta>,
    mu: Mutex<Guarded>,
}

struct Guarded {
    if_state: Arc<State>,
    /// Coalesced poll request: `Some(force)`. Force is sticky across
    /// coalescing.
    pending: Option<bool>,
    callbacks: HashMap<u64, Arc<ChangeCallback>>,
    next_callback_id: u64,
    gw_cache: Option<(IpAddr, IpAddr)>,
    started: bool,
    closed: bool,
    last_wall: SystemTime,
    time_jumped: bool,
}

impl Monitor {
    /// Creates an inactive monitor wired per `options`. Call
    /// [`Monitor::start`] to begin monitoring and
    /// [`Monitor::register_change_callback`] to get notified of changes.
    ///
    /// Fails if the initial snapshot cannot be taken or the platform has no
    /// change source.
    pub fn new(options: MonitorOptions) -> Result<Self> {
        let snapshotter: Box<dyn Snapshotter> = options
            .snapshotter
            .unwrap_or_else(|| Box::new(OsSnapshotter::new()));
        let initial = snapshotter.snapshot(options.self_interface.as_deref())?;
        let source: Arc<dyn EventSource> = match options.source {
            Some(source) => Arc::from(source),
            None => Arc::from(os::new_event_source()?),
        };
        let (changed_tx, _) = broadcast::channel(16);
        let (stop_tx, _) = watch::channel(false);

        Ok(Monitor {
            inner: Arc::new(Inner {
                snapshotter,
                source: Some(source),
                self_interface: options.self_interface,
                interesting: options.interesting_interface,
                time_jumps_enabled: options.monitor_time_jumps && PLATFORM_MONITORS_TIME_JUMPS,
                is_static: false,
                notify: Notify::new(),
                changed_tx,
                mu: Mutex::new(Guarded {
                    if_state: Arc::new(initial),
                    pending: None,
                    callbacks: HashMap::new(),
                    next_callback_id: 0,
                    gw_cache: None,
                    started: false,
                    closed: false,
                    last_wall: SystemTime::now(),
                    time_jumped: false,
                }),
            }),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Returns a one-time snapshot of the network state that never
    /// monitors. Intended for tests, cleanups, and short-lived programs.
    pub fn new_static() -> Self {
        let snapshotter = OsSnapshotter::new();
        let initial = snapshotter.snapshot(None).unwrap_or_default();
        let (changed_tx, _) = broadcast::channel(1);
        let (stop_tx, _) = watch::channel(false);

        Monitor {
            inner: Arc::new(Inner {
                snapshotter: Box::new(snapshotter),
                source: None,
                self_interface: None,
                interesting: None,
                time_jumps_enabled: false,
                is_static: true,
                notify: Notify::new(),
                changed_tx,
                mu: Mutex::new(Guarded {
                    if_state: Arc::new(initial),
                    pending: None,
                    callbacks: HashMap::new(),
                    next_callback_id: 0,
                    gw_cache: None,
                    started: false,
                    closed: false,
                    last_wall: SystemTime::now(),
                    time_jumped: false,
                }),
            }),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts the background tasks. A monitor can only be started and
    /// closed once; repeated calls are no-ops. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) {
        if self.inner.is_static {
            return;
        }
        {
            let mut st = self.inner.mu.lock();
            if st.started || st.closed {
                return;
            }
            st.started = true;
        }

        let mut tasks = self.tasks.lock();
        if let Some(source) = self.inner.source.clone() {
            tasks.push(tokio::spawn(pump(
                Arc::clone(&self.inner),
                source,
                self.stop_tx.subscribe(),
            )));
        }
        tasks.push(tokio::spawn(debounce(
            Arc::clone(&self.inner),
            self.stop_tx.subscribe(),
        )));
        if self.inner.time_jumps_enabled {
            tasks.push(tokio::spawn(poll_wall_time(
                Arc::clone(&self.inner),
                self.stop_tx.subscribe(),
            )));
        }
    }

    /// Closes the monitor: stops the background tasks, closes the change
    /// source, and waits for the tasks to finish. No callback is invoked
    /// after `close` returns. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.is_static {
            return Ok(());
        }
        {
            let mut st = self.inner.mu.lock();
            if st.closed {
                return Ok(());
            }
            st.closed = true;
        }
        let _ = self.stop_tx.send(true);

        let mut result = Ok(());
        if let Some(source) = &self.inner.source {
            if let Err(err) = source.close() {
                result = Err(err);
            }
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        futures::future::join_all(tasks).await;
        result
    }

    /// Adds `callback` to the set of parties notified (each in its own
    /// task) when the network state changes. Call
    /// [`CallbackHandle::unregister`] to remove it; closing the monitor
    /// stops all dispatch.
    pub fn register_change_callback(
        &self,
        callback: impl Fn(&ChangeDelta) + Send + Sync + 'static,
    ) -> CallbackHandle {
        if self.inner.is_static {
            return CallbackHandle { inner: Weak::new(), id: 0 };
        }
        let mut st = self.inner.mu.lock();
        let id = st.next_callback_id;
        st.next_callback_id += 1;
        st.callbacks.insert(id, Arc::new(callback));
        CallbackHandle { inner: Arc::downgrade(&self.inner), id }
    }

    /// Subscribes to the broadcast stream of deltas, for consumers that
    /// prefer a channel over a callback.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeDelta> {
        self.inner.changed_tx.subscribe()
    }

    /// The latest snapshot of the machine's network interfaces. Treat the
    /// returned state as read-only.
    pub fn interface_state(&self) -> Arc<State> {
        Arc::clone(&self.inner.mu.lock().if_state)
    }

    /// The mesh client's own interface name, if configured.
    pub fn self_interface_name(&self) -> Option<String> {
        self.inner.self_interface.clone()
    }

    /// The current network's default gateway and the machine's own IP
    /// facing it. Cached until the monitor detects a rebind-worthy change.
    pub fn gateway_and_self_ip(&self) -> Option<(IpAddr, IpAddr)> {
        if self.inner.is_static {
            return None;
        }
        if let Some(cached) = self.inner.mu.lock().gw_cache {
            return Some(cached);
        }
        // Route-table read happens outside the lock; last writer wins.
        let state = self.interface_state();
        let pair = route::likely_home_router_ip(&state)?;
        let mut st = self.inner.mu.lock();
        if st.gw_cache.replace(pair) != Some(pair) {
            debug!(gw = %pair.0, self_ip = %pair.1, "gateway and self IP changed");
        }
        Some(pair)
    }

    /// Forces the monitor to pretend there was a network change and
    /// re-check the state. Registered callbacks fire within the coalescing
    /// window even if the re-checked state is identical. Non-blocking.
    pub fn inject_event(&self) {
        self.inner.signal(true);
    }

    /// Asks the monitor to re-check the network state, notifying callbacks
    /// only if the state actually differs. Non-blocking.
    pub fn poll(&self) {
        self.inner.signal(false);
    }
}

impl Inner {
    /// Records a coalesced poll request and wakes the debounce task.
    /// A force request is sticky: coalescing with a non-forced one keeps
    /// the force bit.
    fn signal(&self, force: bool) {
        if self.is_static {
            return;
        }
        {
            let mut st = self.mu.lock();
            if st.closed {
                return;
            }
            let pending = st.pending.unwrap_or(false);
            st.pending = Some(pending || force);
        }
        self.notify.notify_one();
    }

    fn stopped(&self) -> bool {
        self.mu.lock().closed
    }

    /// Considers whether `new_state` is different enough to wake callers,
    /// updating the stored state if so. With `force`, callers are always
    /// notified. The lock is released before any dispatch.
    fn handle_potential_change(&self, new_state: State, force: bool) {
        let (delta, callbacks) = {
            let mut st = self.mu.lock();
            if st.closed {
                return;
            }
            let old = Arc::clone(&st.if_state);
            let time_jumped = self.time_jumps_enabled && check_wall_advance_locked(&mut st);
            if !time_jumped && !force && *old == new_state {
                debug!("network state unchanged");
                return;
            }

            let new_state = Arc::new(new_state);
            let delta = ChangeDelta::with_filter(
                Some(old),
                Arc::clone(&new_state),
                time_jumped,
                self.self_interface.as_deref(),
                self.interesting.as_deref(),
            );
            if delta.rebind_likely_required {
                st.gw_cache = None;
            }
            st.if_state = new_state;
            if time_jumped {
                // Consume the queued jump signal.
                st.time_jumped = false;
            }
            let callbacks: Vec<Arc<ChangeCallback>> = st.callbacks.values().cloned().collect();
            (delta, callbacks)
        };

        debug!(
            rebind = delta.rebind_likely_required,
            time_jumped = delta.time_jumped,
            default_route_changed = delta.default_interface_changed,
            "dispatching network change"
        );
        let _ = self.changed_tx.send(delta.clone());
        for callback in callbacks {
            let delta = delta.clone();
            tokio::spawn(async move { callback(&delta) });
        }
    }
}

/// Reports whether wall time advanced more than 150% of the poll interval,
/// indicating the machine probably came out of sleep. A detected jump is
/// sticky until the debounce round that dispatches it resets the flag.
fn check_wall_advance_locked(st: &mut Guarded) -> bool {
    let now = SystemTime::now();
    if let Ok(gap) = now.duration_since(st.last_wall) {
        if gap > WALL_POLL_INTERVAL * 3 / 2 {
            st.time_jumped = true;
        }
    }
    st.last_wall = now;
    st.time_jumped
}

/// Continuously drains the event source, waking the debounce task on
/// non-ignorable notifications. Receive errors are retried with a fixed
/// backoff for as long as the monitor is open; they are never fatal.
async fn pump(
    inner: Arc<Inner>,
    source: Arc<dyn EventSource>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            _ = stop.changed() => return,
            received = source.recv() => received,
        };
        match received {
            Ok(event) => {
                if !event.is_ignorable() {
                    inner.signal(false);
                }
            }
            Err(err) => {
                if inner.stopped() {
                    return;
                }
                warn!("error from link monitor: {err}");
                tokio::select! {
                    _ = stop.changed() => return,
                    _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => {}
                }
            }
        }
    }
}

/// Serializes change handling: take the coalesced signal, re-snapshot,
/// diff, dispatch, then sleep out the quiescence window before accepting
/// the next signal.
async fn debounce(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = inner.notify.notified() => {}
        }
        let force = inner.mu.lock().pending.take().unwrap_or(false);

        match inner.snapshotter.snapshot(inner.self_interface.as_deref()) {
            Ok(new_state) => inner.handle_potential_change(new_state, force),
            Err(err) => warn!("interface snapshot failed: {err}"),
        }

        tokio::select! {
            _ = stop.changed() => return,
            _ = tokio::time::sleep(DEBOUNCE_INTERVAL) => {}
        }
    }
}

/// Periodically compares wall time against the last observation and
/// injects a forced poll when a jump is detected.
async fn poll_wall_time(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(WALL_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick completes immediately
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = ticker.tick() => {}
        }
        let jumped = {
            let mut st = inner.mu.lock();
            if st.closed {
                return;
            }
            check_wall_advance_locked(&mut st)
        };
        if jumped {
            inner.signal(true);
        }
    }
}
