//! Readiness notifier over the OS event multiplexer.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, Weak};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use netforge_core::{ErrorCode, Result, net_error};
use tracing::debug;

use crate::socket::Socket;
use crate::state::EventSet;

const WAKER_TOKEN: Token = Token(usize::MAX);

/// One readiness notification.
pub struct SocketEvent {
    pub sock: Arc<Socket>,
    pub events: EventSet,
}

/// The blocking side of the notifier, owned by the engine's main loop.
pub(crate) struct Poller {
    poll: Poll,
    events: Events,
    handle: Arc<PollerHandle>,
}

/// The shareable side: registration, rearming and interrupt. Safe to use
/// from worker threads while the main loop sits in [`Poller::run`].
pub(crate) struct PollerHandle {
    registry: mio::Registry,
    waker: Waker,
    sockets: Mutex<HashMap<usize, Weak<Socket>>>,
}

impl Poller {
    pub(crate) fn new(max_events: usize) -> Result<Self> {
        let poll = Poll::new().map_err(|e| net_error!(ErrorCode::IoUnknown, "poll: {e}"))?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)
            .map_err(|e| net_error!(ErrorCode::IoUnknown, "waker: {e}"))?;
        let registry = poll
            .registry()
            .try_clone()
            .map_err(|e| net_error!(ErrorCode::IoUnknown, "registry: {e}"))?;
        Ok(Self {
            poll,
            events: Events::with_capacity(max_events.max(1)),
            handle: Arc::new(PollerHandle { registry, waker, sockets: Mutex::new(HashMap::new()) }),
        })
    }

    pub(crate) fn handle(&self) -> Arc<PollerHandle> {
        Arc::clone(&self.handle)
    }

    /// Blocks until events arrive or [`PollerHandle::interrupt`] is
    /// called; fills `out` with resolved socket events.
    pub(crate) fn run(&mut self, out: &mut Vec<SocketEvent>) -> Result<()> {
        out.clear();
        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(net_error!(ErrorCode::IoUnknown, "poll: {e}")),
            }
        }

        let sockets = self.handle.sockets.lock().expect("poller map poisoned");
        for event in &self.events {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let Some(sock) = sockets.get(&event.token().0).and_then(Weak::upgrade) else {
                continue;
            };

            let mut mask = EventSet::empty();
            if event.is_read_closed() || event.is_write_closed() {
                mask |= EventSet::CLOSED;
            }
            if event.is_readable() {
                mask |= EventSet::READ;
            }
            if event.is_writable() {
                mask |= EventSet::WRITE;
            }
            if mask.is_empty() {
                mask = EventSet::ERROR;
            }
            out.push(SocketEvent { sock, events: mask });
        }
        Ok(())
    }
}

impl PollerHandle {
    fn interests(sock: &Socket) -> Interest {
        let state = sock.state();
        match (state.nbl_read, state.nbl_write) {
            (_, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (true, true) => Interest::READABLE | Interest::WRITABLE,
        }
    }

    /// Registers the socket for the directions its state asks for.
    pub(crate) fn add(&self, sock: &Arc<Socket>) -> Result<()> {
        let fd = sock.fd();
        self.sockets
            .lock()
            .expect("poller map poisoned")
            .insert(fd as usize, Arc::downgrade(sock));
        self.registry
            .register(&mut SourceFd(&fd), Token(fd as usize), Self::interests(sock))
            .map_err(|e| register_error(&e))
    }

    /// Re-installs the interest set after an event was handled.
    pub(crate) fn rearm(&self, sock: &Arc<Socket>) -> Result<()> {
        let fd = sock.fd();
        self.registry
            .reregister(&mut SourceFd(&fd), Token(fd as usize), Self::interests(sock))
            .map_err(|e| register_error(&e))
    }

    /// Drops the registration. A closed socket's fd is already gone from
    /// the multiplexer, so only the map entry is removed then.
    pub(crate) fn remove(&self, sock: &Arc<Socket>) {
        let fd = sock.fd();
        self.sockets.lock().expect("poller map poisoned").remove(&(fd as usize));
        if !sock.is_closed() && fd >= 0 {
            if let Err(e) = self.registry.deregister(&mut SourceFd(&fd)) {
                debug!(?e, "poller: deregister");
            }
        }
    }

    /// Wakes a blocked [`Poller::run`]. Idempotent.
    pub(crate) fn interrupt(&self) {
        if let Err(e) = self.waker.wake() {
            debug!(?e, "poller: wake");
        }
    }
}

fn register_error(e: &io::Error) -> netforge_core::Error {
    if e.raw_os_error() == Some(libc::ENOSPC) {
        net_error!(ErrorCode::MaxReached, "event table full")
    } else {
        net_error!(ErrorCode::IoUnknown, "register: {e}")
    }
}
