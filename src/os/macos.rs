//! Darwin change source: a `PF_ROUTE` socket.
//!
//! The kernel broadcasts routing messages (interface state, address, and
//! route changes) to every `PF_ROUTE` socket. A dedicated blocking thread
//! reads them with a short receive timeout so a close request is honored
//! promptly, classifies each message by its rtm type, and forwards the
//! result over a channel.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{EventSource, OsEvent};
use crate::error::{Error, Result};

const RECV_BUF_LEN: usize = 4096;
const RECV_TIMEOUT_USEC: libc::suseconds_t = 250_000; // 250ms

pub struct RouteSocketEventSource {
    rx: Mutex<mpsc::UnboundedReceiver<Result<OsEvent>>>,
    closed: Arc<AtomicBool>,
}

impl RouteSocketEventSource {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::socket(libc::PF_ROUTE, libc::SOCK_RAW, libc::AF_UNSPEC) };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        let timeout = libc::timeval { tv_sec: 0, tv_usec: RECV_TIMEOUT_USEC };
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let thread_closed = Arc::clone(&closed);
        std::thread::Builder::new()
            .name("linkwatch-routesock".into())
            .spawn(move || reader_loop(fd, tx, thread_closed))
            .map_err(Error::Io)?;

        Ok(Self { rx: Mutex::new(rx), closed })
    }
}

#[async_trait]
impl EventSource for RouteSocketEventSource {
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

fn reader_loop(fd: libc::c_int, tx: mpsc::UnboundedSender<Result<OsEvent>>, closed: Arc<AtomicBool>) {
    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                    continue;
                }
                _ => {
                    if closed.load(Ordering::SeqCst) || tx.send(Err(Error::Io(err))).is_err() {
                        break;
                    }
                    continue;
                }
            }
        }
        if let Some(event) = classify(&buf[..n as usize]) {
            if tx.send(Ok(event)).is_err() {
                break;
            }
        }
    }
    unsafe { libc::close(fd) };
}

/// Classifies one routing-socket message by its rtm type.
fn classify(bytes: &[u8]) -> Option<OsEvent> {
    // rtm_msglen: u16, rtm_version: u8, rtm_type: u8 lead every message.
    if bytes.len() < 4 {
        return None;
    }
    let rtm_type = bytes[3] as libc::c_int;
    let event = match rtm_type {
        libc::RTM_NEWADDR | libc::RTM_DELADDR => OsEvent::AddressChanged {
            index: address_message_index(bytes),
        },
        libc::RTM_IFINFO => OsEvent::LinkChanged {
            index: link_message_index(bytes),
            name: None,
        },
        libc::RTM_ADD | libc::RTM_DELETE | libc::RTM_CHANGE => OsEvent::RouteChanged,
        _ => OsEvent::Noise,
    };
    Some(event)
}

fn address_message_index(bytes: &[u8]) -> u32 {
    if bytes.len() < mem::size_of::<libc::ifa_msghdr>() {
        return 0;
    }
    let ifam = unsafe { &*(bytes.as_ptr() as *const libc::ifa_msghdr) };
    ifam.ifam_index as u32
}

fn link_message_index(bytes: &[u8]) -> u32 {
    if bytes.len() < mem::size_of::<libc::if_msghdr>() {
        return 0;
    }
    let ifm = unsafe { &*(bytes.as_ptr() as *const libc::if_msghdr) };
    ifm.ifm_index as u32
}
