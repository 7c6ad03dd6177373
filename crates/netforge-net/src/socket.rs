use std::any::Any;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use netforge_core::{ErrorCode, Result, net_error};

use crate::addr::{self, SocketFamily};
use crate::plain::{self, PlainSocket};
use crate::state::SocketState;
use crate::tls::{TlsClientOpts, TlsServerOpts, tls_client_backend, tls_listener_backend};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Dgram,
}

/// Result of a socket write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Everything was written.
    Complete(usize),
    /// The kernel took only part of the data; resume on write readiness.
    Again(usize),
}

impl WriteOutcome {
    pub fn written(self) -> usize {
        match self {
            Self::Complete(n) | Self::Again(n) => n,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// The backend-specific subset of socket operations. Everything fd-level
/// (bind, listen, options, addresses) is shared between backends.
pub(crate) trait SocketBackend: Send {
    fn fd(&self) -> RawFd;
    fn accept(&mut self, state: &mut SocketState) -> Result<Box<dyn SocketBackend>>;
    fn connect(&mut self, addr: &SocketAddr, host: &str, state: &mut SocketState) -> Result<()>;
    fn read(&mut self, buf: &mut [u8], state: &mut SocketState) -> Result<usize>;
    fn write(&mut self, src: &[u8], state: &mut SocketState) -> Result<WriteOutcome>;
    fn dgram_recv(&mut self, buf: &mut [u8], state: &mut SocketState) -> Result<(usize, SocketAddr)>;
    fn dgram_send(&mut self, src: &[u8], to: &SocketAddr, state: &mut SocketState) -> Result<usize>;
    fn shutdown(&mut self, how: Shutdown) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Installed by the stream engine so that state changes made from worker
/// threads (close, error, blocked directions) reach the notifier loop.
pub(crate) trait EngineHook: Send + Sync {
    fn socket_updated(&self, sock: &Arc<Socket>);
}

struct Inner {
    io: Box<dyn SocketBackend>,
    state: SocketState,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
}

/// A non-blocking-capable network endpoint, plain or TLS.
///
/// Handles are shared (`Arc<Socket>`): the engine's connection map and
/// every queued event hold a strong reference, so a socket lives exactly
/// as long as something still refers to it. A single internal mutex makes
/// every public method safe to call from any thread; the engine's
/// per-direction dispatch locks are separate state flags, not this mutex.
pub struct Socket {
    family: SocketFamily,
    kind: SocketKind,
    /// Cached at creation; stays valid as a map key after close.
    fd: RawFd,
    inner: Mutex<Inner>,
    hook: Mutex<Option<Weak<dyn EngineHook>>>,
}

impl Socket {
    pub fn new_stream(family: SocketFamily) -> Result<Arc<Self>> {
        let af = match family {
            SocketFamily::Ipv4 => libc::AF_INET,
            SocketFamily::Ipv6 => libc::AF_INET6,
        };
        let io = PlainSocket::open(af, SocketKind::Stream)?;
        Ok(Self::from_backend(family, SocketKind::Stream, Box::new(io)))
    }

    pub fn new_dgram(family: SocketFamily) -> Result<Arc<Self>> {
        let af = match family {
            SocketFamily::Ipv4 => libc::AF_INET,
            SocketFamily::Ipv6 => libc::AF_INET6,
        };
        let io = PlainSocket::open(af, SocketKind::Dgram)?;
        Ok(Self::from_backend(family, SocketKind::Dgram, Box::new(io)))
    }

    /// Stream socket that answers TLS handshakes on accepted connections.
    pub fn new_tls_server(family: SocketFamily, opts: &TlsServerOpts) -> Result<Arc<Self>> {
        let io = tls_listener_backend(family, opts)?;
        Ok(Self::from_backend(family, SocketKind::Stream, io))
    }

    /// Stream socket that runs a TLS client handshake on connect.
    pub fn new_tls_client(family: SocketFamily, opts: &TlsClientOpts) -> Result<Arc<Self>> {
        let io = tls_client_backend(family, opts)?;
        Ok(Self::from_backend(family, SocketKind::Stream, io))
    }

    pub(crate) fn from_backend(
        family: SocketFamily,
        kind: SocketKind,
        io: Box<dyn SocketBackend>,
    ) -> Arc<Self> {
        let fd = io.fd();
        Arc::new(Self {
            family,
            kind,
            fd,
            inner: Mutex::new(Inner { io, state: SocketState::default(), user_data: None }),
            hook: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("socket mutex poisoned")
    }

    pub fn family(&self) -> SocketFamily {
        self.family
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn bind(&self, host: &str, port: u16) -> Result<()> {
        let addr = addr::resolve(self.family, host, port)?;
        let g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        plain::bind_fd(g.io.fd(), &addr)
    }

    pub fn listen(&self, backlog: u32) -> Result<()> {
        let g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        plain::listen_fd(g.io.fd(), backlog)
    }

    /// Accepts one pending connection as a new socket handle.
    pub fn accept(&self) -> Result<Arc<Self>> {
        let mut g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        g.state.read_again = false;
        let Inner { io, state, .. } = &mut *g;
        let backend = io.accept(state)?;
        Ok(Self::from_backend(self.family, self.kind, backend))
    }

    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        let addr = addr::resolve(self.family, host, port)?;
        let mut g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        g.state.read_again = false;
        let Inner { io, state, .. } = &mut *g;
        io.connect(&addr, host, state)
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        let mut g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        g.io.shutdown(how)
    }

    /// Closes the socket. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut g = self.lock();
        if g.state.closed {
            return Ok(());
        }
        g.io.close()?;
        g.state.closed = true;
        Ok(())
    }

    /// Reads available bytes. `IoAgain` means nothing was ready;
    /// `IoClosed` means the peer is gone.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        g.state.read_again = false;
        g.state.read_again_when_writeable = false;
        let Inner { io, state, .. } = &mut *g;
        let res = io.read(buf, state);
        if state.nbl_auto && state.read_again_when_writeable {
            state.nbl_read = false;
            state.nbl_write = true;
        }
        res
    }

    /// Writes as much of `src` as the kernel takes right now.
    pub fn write(&self, src: &[u8]) -> Result<WriteOutcome> {
        let mut g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        g.state.write_again = false;
        g.state.write_again_when_readable = false;
        let Inner { io, state, .. } = &mut *g;
        let res = io.write(src, state);
        if state.nbl_auto {
            if state.write_again || state.read_again_when_writeable {
                state.nbl_read = false;
                state.nbl_write = true;
            } else {
                state.nbl_write = false;
                state.nbl_read = true;
            }
        }
        res
    }

    pub fn dgram_recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        let Inner { io, state, .. } = &mut *g;
        io.dgram_recv(buf, state)
    }

    pub fn dgram_send(&self, src: &[u8], to: &SocketAddr) -> Result<usize> {
        let mut g = self.lock();
        if g.state.closed {
            return Err(net_error!(ErrorCode::IoClosed));
        }
        let Inner { io, state, .. } = &mut *g;
        io.dgram_send(src, to, state)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        plain::local_addr_fd(self.fd())
    }

    pub fn remote_addr(&self) -> Result<SocketAddr> {
        plain::remote_addr_fd(self.fd())
    }

    /* ---- options ---- */

    pub fn set_nonblocking(&self, enabled: bool) -> Result<()> {
        let mut g = self.lock();
        plain::set_nonblocking_fd(g.io.fd(), enabled)?;
        g.state.nonblocking = enabled;
        Ok(())
    }

    pub fn set_keepalive(&self, enabled: bool) -> Result<()> {
        plain::set_opt_int(self.fd(), libc::SOL_SOCKET, libc::SO_KEEPALIVE, i32::from(enabled))
    }

    pub fn set_tcp_nodelay(&self, enabled: bool) -> Result<()> {
        plain::set_opt_int(self.fd(), libc::IPPROTO_TCP, libc::TCP_NODELAY, i32::from(enabled))
    }

    pub fn tcp_nodelay(&self) -> Result<bool> {
        plain::get_opt_int(self.fd(), libc::IPPROTO_TCP, libc::TCP_NODELAY).map(|v| v != 0)
    }

    pub fn set_recv_timeout(&self, timeout: Duration) -> Result<()> {
        plain::set_opt_timeout(self.fd(), libc::SO_RCVTIMEO, timeout)
    }

    pub fn set_send_timeout(&self, timeout: Duration) -> Result<()> {
        plain::set_opt_timeout(self.fd(), libc::SO_SNDTIMEO, timeout)
    }

    pub fn set_tcp_keepalive_idle(&self, secs: u32) -> Result<()> {
        plain::set_opt_int(self.fd(), libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, secs as i32)
    }

    pub fn set_tcp_keepalive_interval(&self, secs: u32) -> Result<()> {
        plain::set_opt_int(self.fd(), libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, secs as i32)
    }

    pub fn set_tcp_keepalive_probes(&self, count: u32) -> Result<()> {
        plain::set_opt_int(self.fd(), libc::IPPROTO_TCP, libc::TCP_KEEPCNT, count as i32)
    }

    /* ---- state ---- */

    /// Snapshot of the current state flags.
    pub fn state(&self) -> SocketState {
        self.lock().state
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SocketState) -> R) -> R {
        f(&mut self.lock().state)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().state.closed
    }

    pub fn is_nonblocking(&self) -> bool {
        self.lock().state.nonblocking
    }

    /// Requests readiness notifications for the given directions.
    pub fn set_readiness(&self, read: bool, write: bool) {
        self.with_state(|s| {
            s.nbl_read = read;
            s.nbl_write = write;
        });
    }

    /// Lets the socket flip its requested readiness direction after each
    /// operation, starting with reads.
    pub fn enable_auto_readiness(&self) {
        self.with_state(|s| {
            s.nbl_auto = true;
            s.nbl_read = true;
        });
    }

    /// Acquires the requested per-direction dispatch locks, or fails
    /// without acquiring anything.
    pub(crate) fn try_lock_dirs(&self, read: bool, write: bool) -> bool {
        self.with_state(|s| {
            if (read && s.read_locked) || (write && s.write_locked) {
                return false;
            }
            if read {
                s.read_locked = true;
            }
            if write {
                s.write_locked = true;
            }
            true
        })
    }

    pub(crate) fn unlock_dirs(&self, read: bool, write: bool) {
        self.with_state(|s| {
            if read {
                s.read_locked = false;
            }
            if write {
                s.write_locked = false;
            }
        });
    }

    /* ---- user data ---- */

    pub fn set_user_data(&self, data: Option<Arc<dyn Any + Send + Sync>>) {
        self.lock().user_data = data;
    }

    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.lock().user_data.clone()
    }

    /* ---- engine hook ---- */

    pub(crate) fn install_hook(&self, hook: Weak<dyn EngineHook>) {
        *self.hook.lock().expect("hook mutex poisoned") = Some(hook);
    }

    /// Tells the owning stream engine that this socket's state changed in
    /// a way that affects readiness (closed, errored, or a blocked
    /// direction). No-op outside an engine.
    pub fn update_engine(self: &Arc<Self>) {
        let hook = self.hook.lock().expect("hook mutex poisoned").clone();
        if let Some(hook) = hook.and_then(|weak| weak.upgrade()) {
            hook.socket_updated(self);
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("family", &self.family)
            .field("kind", &self.kind)
            .field("fd", &self.fd())
            .finish()
    }
}
