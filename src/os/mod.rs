//! Platform change sources.
//!
//! Each supported OS exposes a passive stream of low-level network change
//! notifications (link up/down, address added, route changed). The
//! [`EventSource`] trait is the capability seam: the monitor core never
//! branches on platform identity, it just drains whichever source was
//! injected at construction.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A classified OS notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsEvent {
    /// An interface appeared, disappeared, or changed link state.
    LinkChanged { index: u32, name: Option<String> },
    /// An address was added to or removed from an interface.
    AddressChanged { index: u32 },
    /// The kernel routing table changed.
    RouteChanged,
    /// OS chatter with no bearing on network attachment.
    Noise,
}

impl OsEvent {
    /// Whether the pump should drop this event without waking the debounce
    /// stage.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, OsEvent::Noise)
    }
}

/// A passive, per-platform listener for network change notifications.
///
/// `recv` blocks until there is an event or the source is closed; once
/// closed, callers ignore any returned error. `close` is idempotent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn recv(&self) -> Result<OsEvent>;

    fn close(&self) -> Result<()>;
}

/// Constructs the change source for the current platform. Fails hard when
/// the platform has no listener; the monitor surfaces that from its
/// constructor rather than degrading silently.
pub fn new_event_source() -> Result<Box<dyn EventSource>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::NetlinkEventSource::new()?))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(macos::RouteSocketEventSource::new()?))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(crate::error::Error::unsupported("network change monitoring"))
    }
}
