//! Linux change source: an rtnetlink socket subscribed to the link,
//! address, and route multicast groups.
//!
//! The netlink socket is drained on a dedicated blocking thread and bridged
//! to async consumers over an unbounded channel; the thread polls with
//! `MSG_DONTWAIT` so a close request is honored within one poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::link::LinkAttribute;
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{EventSource, OsEvent};
use crate::error::{Error, Result};

// rtnetlink multicast group bitmasks.
const RTMGRP_LINK: u32 = 0x1;
const RTMGRP_IPV4_IFADDR: u32 = 0x10;
const RTMGRP_IPV4_ROUTE: u32 = 0x40;
const RTMGRP_IPV6_IFADDR: u32 = 0x100;
const RTMGRP_IPV6_ROUTE: u32 = 0x400;

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(25);
const RECV_BUF_LEN: usize = 8192;

pub struct NetlinkEventSource {
    rx: Mutex<mpsc::UnboundedReceiver<Result<OsEvent>>>,
    closed: Arc<AtomicBool>,
}

impl NetlinkEventSource {
    pub fn new() -> Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::system(format!("netlink socket: {e}")))?;
        let groups = RTMGRP_LINK
            | RTMGRP_IPV4_IFADDR
            | RTMGRP_IPV4_ROUTE
            | RTMGRP_IPV6_IFADDR
            | RTMGRP_IPV6_ROUTE;
        // The groups field takes a bitmask, not a group id.
        socket
            .bind(&SocketAddr::new(0, groups))
            .map_err(|e| Error::system(format!("netlink bind: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let thread_closed = Arc::clone(&closed);
        std::thread::Builder::new()
            .name("linkwatch-netlink".into())
            .spawn(move || reader_loop(socket, tx, thread_closed))
            .map_err(Error::Io)?;

        Ok(Self { rx: Mutex::new(rx), closed })
    }
}

#[async_trait]
impl EventSource for NetlinkEventSource {
    async fn recv(&self) -> Result<OsEvent> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(item) => item,
            None => Err(Error::SourceClosed),
        }
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn reader_loop(
    socket: Socket,
    tx: mpsc::UnboundedSender<Result<OsEvent>>,
    closed: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    while !closed.load(Ordering::SeqCst) {
        // recv writes through BufMut, so hand it the slice, not the Vec.
        match socket.recv(&mut &mut buf[..], libc::MSG_DONTWAIT) {
            Ok(n) => {
                for event in parse_datagram(&buf[..n]) {
                    if tx.send(Ok(event)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(RECV_POLL_INTERVAL);
            }
            Err(e) => {
                if closed.load(Ordering::SeqCst) || tx.send(Err(Error::Io(e))).is_err() {
                    return;
                }
                std::thread::sleep(RECV_POLL_INTERVAL);
            }
        }
    }
}

/// One datagram may carry several netlink messages; classify each.
fn parse_datagram(mut bytes: &[u8]) -> Vec<OsEvent> {
    let mut events = Vec::new();
    while !bytes.is_empty() {
        let msg = match NetlinkMessage::<RouteNetlinkMessage>::deserialize(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("undecodable netlink message: {e}");
                break;
            }
        };
        let len = (msg.header.length as usize).max(1);
        if let NetlinkPayload::InnerMessage(route_msg) = msg.payload {
            events.push(classify(route_msg));
        }
        // Messages are 4-byte aligned within the datagram.
        let advance = (len + 3) & !3;
        if advance >= bytes.len() {
            break;
        }
        bytes = &bytes[advance..];
    }
    events
}

fn classify(msg: RouteNetlinkMessage) -> OsEvent {
    match msg {
        RouteNetlinkMessage::NewLink(link)
        | RouteNetlinkMessage::DelLink(link)
        | RouteNetlinkMessage::SetLink(link) => OsEvent::LinkChanged {
            index: link.header.index,
            name: link_name(&link.attributes),
        },
        RouteNetlinkMessage::NewAddress(addr) | RouteNetlinkMessage::DelAddress(addr) => {
            OsEvent::AddressChanged { index: addr.header.index }
        }
        RouteNetlinkMessage::NewRoute(_) | RouteNetlinkMessage::DelRoute(_) => {
            OsEvent::RouteChanged
        }
        _ => OsEvent::Noise,
    }
}

fn link_name(attributes: &[LinkAttribute]) -> Option<String> {
    attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}
