//! Plain (non-encrypted) socket backend over raw fds.

use std::io;
use std::mem;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::time::Duration;

use netforge_core::{Error, ErrorCode, Result, net_error};

use crate::addr::{sockaddr_from_std, sockaddr_to_std};
use crate::socket::{SocketBackend, SocketKind, WriteOutcome};
use crate::state::SocketState;

pub(crate) struct PlainSocket {
    fd: RawFd,
}

impl PlainSocket {
    pub(crate) fn open(af: libc::c_int, kind: SocketKind) -> Result<Self> {
        let ty = match kind {
            SocketKind::Stream => libc::SOCK_STREAM,
            SocketKind::Dgram => libc::SOCK_DGRAM,
        };
        let fd = unsafe { libc::socket(af, ty, 0) };
        if fd < 0 {
            return Err(os_error("socket"));
        }
        Ok(Self { fd })
    }

    pub(crate) fn from_fd(fd: RawFd) -> Self {
        Self { fd }
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// `io::Read`/`io::Write` view for layering TLS on top.
    pub(crate) fn io(&mut self) -> FdIo<'_> {
        FdIo { fd: self.fd, _sock: std::marker::PhantomData }
    }
}

impl Drop for PlainSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}

impl SocketBackend for PlainSocket {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn accept(&mut self, state: &mut SocketState) -> Result<Box<dyn SocketBackend>> {
        let fd = accept_fd(self.fd, state)?;
        Ok(Box::new(Self::from_fd(fd)))
    }

    fn connect(&mut self, addr: &SocketAddr, _host: &str, state: &mut SocketState) -> Result<()> {
        let (saddr, len) = sockaddr_from_std(addr);
        let rc = unsafe { libc::connect(self.fd, (&raw const saddr).cast(), len) };
        if rc != 0 {
            return Err(read_error(state));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], state: &mut SocketState) -> Result<usize> {
        let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
        match n {
            0 => Err(net_error!(ErrorCode::IoClosed)),
            n if n < 0 => Err(read_error(state)),
            n => Ok(n as usize),
        }
    }

    fn write(&mut self, src: &[u8], state: &mut SocketState) -> Result<WriteOutcome> {
        let mut written = 0;
        while written < src.len() {
            let n = unsafe {
                libc::send(
                    self.fd,
                    src[written..].as_ptr().cast(),
                    src.len() - written,
                    libc::MSG_NOSIGNAL,
                )
            };
            if n < 0 {
                let err = write_error(state);
                if err.is_again() {
                    return Ok(WriteOutcome::Again(written));
                }
                return Err(err);
            }
            written += n as usize;
        }
        Ok(WriteOutcome::Complete(written))
    }

    fn dgram_recv(&mut self, buf: &mut [u8], state: &mut SocketState) -> Result<(usize, SocketAddr)> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let n = unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
                (&raw mut storage).cast(),
                &raw mut len,
            )
        };
        if n < 0 {
            return Err(read_error(state));
        }
        Ok((n as usize, sockaddr_to_std(&storage)?))
    }

    fn dgram_send(&mut self, src: &[u8], to: &SocketAddr, state: &mut SocketState) -> Result<usize> {
        let (saddr, len) = sockaddr_from_std(to);
        let n = unsafe {
            libc::sendto(
                self.fd,
                src.as_ptr().cast(),
                src.len(),
                libc::MSG_NOSIGNAL,
                (&raw const saddr).cast(),
                len,
            )
        };
        if n < 0 {
            return Err(write_error(state));
        }
        Ok(n as usize)
    }

    fn shutdown(&mut self, how: Shutdown) -> Result<()> {
        let dir = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        if unsafe { libc::shutdown(self.fd, dir) } != 0 {
            return Err(os_error("shutdown"));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.fd >= 0 {
            let rc = unsafe { libc::close(self.fd) };
            self.fd = -1;
            if rc != 0 {
                return Err(os_error("close"));
            }
        }
        Ok(())
    }
}

/// Raw accept shared by the plain and TLS backends.
pub(crate) fn accept_fd(listener: RawFd, state: &mut SocketState) -> Result<RawFd> {
    let fd = unsafe { libc::accept(listener, std::ptr::null_mut(), std::ptr::null_mut()) };
    if fd < 0 {
        return Err(read_error(state));
    }
    Ok(fd)
}

/// Blocking `io::Read`/`io::Write` adapter over the fd, used by the TLS
/// layer. `WouldBlock` surfaces as `io::ErrorKind::WouldBlock`.
pub(crate) struct FdIo<'a> {
    fd: RawFd,
    _sock: std::marker::PhantomData<&'a mut PlainSocket>,
}

impl io::Read for FdIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl io::Write for FdIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::send(self.fd, buf.as_ptr().cast(), buf.len(), libc::MSG_NOSIGNAL) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/* ---- fd-level option plumbing, shared by both backends ---- */

pub(crate) fn bind_fd(fd: RawFd, addr: &SocketAddr) -> Result<()> {
    set_opt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
    let (saddr, len) = sockaddr_from_std(addr);
    let rc = unsafe { libc::bind(fd, (&raw const saddr).cast(), len) };
    if rc != 0 {
        return Err(os_error("bind"));
    }
    Ok(())
}

pub(crate) fn listen_fd(fd: RawFd, backlog: u32) -> Result<()> {
    let rc = unsafe { libc::listen(fd, backlog.min(i32::MAX as u32) as libc::c_int) };
    if rc != 0 {
        return Err(os_error("listen"));
    }
    Ok(())
}

pub(crate) fn set_nonblocking_fd(fd: RawFd, enabled: bool) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(os_error("fcntl(F_GETFL)"));
    }
    let flags = if enabled { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(os_error("fcntl(F_SETFL)"));
    }
    Ok(())
}

pub(crate) fn set_opt_int(fd: RawFd, level: libc::c_int, opt: libc::c_int, val: libc::c_int) -> Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            (&raw const val).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(os_error("setsockopt"));
    }
    Ok(())
}

pub(crate) fn get_opt_int(fd: RawFd, level: libc::c_int, opt: libc::c_int) -> Result<libc::c_int> {
    let mut val: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe { libc::getsockopt(fd, level, opt, (&raw mut val).cast(), &raw mut len) };
    if rc != 0 {
        return Err(os_error("getsockopt"));
    }
    Ok(val)
}

pub(crate) fn set_opt_timeout(fd: RawFd, opt: libc::c_int, timeout: Duration) -> Result<()> {
    let val = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: libc::suseconds_t::from(timeout.subsec_micros()),
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            opt,
            (&raw const val).cast(),
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(os_error("setsockopt"));
    }
    Ok(())
}

pub(crate) fn local_addr_fd(fd: RawFd) -> Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe { libc::getsockname(fd, (&raw mut storage).cast(), &raw mut len) };
    if rc != 0 {
        return Err(os_error("getsockname"));
    }
    sockaddr_to_std(&storage)
}

pub(crate) fn remote_addr_fd(fd: RawFd) -> Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe { libc::getpeername(fd, (&raw mut storage).cast(), &raw mut len) };
    if rc != 0 {
        return Err(os_error("getpeername"));
    }
    sockaddr_to_std(&storage)
}

/* ---- OS error classification ---- */

/// Classifies an OS error into a toolkit error code. Codes that signal a
/// broken socket additionally flag `err` on the state.
pub(crate) fn classify(raw: i32) -> (ErrorCode, bool) {
    // EAGAIN and EWOULDBLOCK may or may not share a value.
    if raw == libc::EAGAIN || raw == libc::EWOULDBLOCK {
        (ErrorCode::IoAgain, false)
    } else if raw == libc::ECONNABORTED {
        (ErrorCode::IoCanceled, false)
    } else if raw == libc::EINTR {
        (ErrorCode::Interrupted, false)
    } else if raw == libc::EMFILE || raw == libc::ENFILE {
        (ErrorCode::MaxReached, false)
    } else if raw == libc::ENOBUFS || raw == libc::ENOMEM {
        (ErrorCode::Memory, false)
    } else if raw == libc::EPROTO {
        (ErrorCode::IoProtocol, true)
    } else if raw == libc::EPERM {
        (ErrorCode::Permission, false)
    } else {
        (ErrorCode::IoUnknown, true)
    }
}

pub(crate) fn read_error(state: &mut SocketState) -> Error {
    let err = io_to_error(&io::Error::last_os_error(), state);
    if err.is_again() {
        state.read_again = true;
    }
    err
}

pub(crate) fn write_error(state: &mut SocketState) -> Error {
    let err = io_to_error(&io::Error::last_os_error(), state);
    if err.is_again() {
        state.write_again = true;
    }
    err
}

pub(crate) fn io_to_error(os: &io::Error, state: &mut SocketState) -> Error {
    let raw = os.raw_os_error().unwrap_or(0);
    let (code, broken) = classify(raw);
    if broken {
        state.err = true;
    }
    net_error!(code, "{raw}: {os}")
}

fn os_error(op: &str) -> Error {
    let os = io::Error::last_os_error();
    net_error!(ErrorCode::IoUnknown, "{op}: {os}")
}
