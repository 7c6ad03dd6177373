//! In-crate helpers for exercising socket-facing code against a
//! socketpair instead of a real network peer.

use std::os::fd::RawFd;

use crate::plain::{PlainSocket, set_nonblocking_fd};

/// A connected unix socketpair: the first half is wrapped as a
/// non-blocking backend, the second is returned raw for the test to
/// drain.
pub(crate) fn nonblocking_pair() -> (PlainSocket, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "socketpair failed");
    set_nonblocking_fd(fds[0], true).unwrap();
    set_nonblocking_fd(fds[1], true).unwrap();
    (PlainSocket::from_fd(fds[0]), fds[1])
}

/// Reads whatever is currently buffered on `fd` into `out`.
pub(crate) fn drain_nonblocking(fd: RawFd, out: &mut Vec<u8>) {
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = unsafe { libc::recv(fd, chunk.as_mut_ptr().cast(), chunk.len(), 0) };
        if n <= 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n as usize]);
    }
}
