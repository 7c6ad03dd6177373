//! Shared send path for protocol connections on top of the stream
//! engine.

use std::sync::{Arc, Mutex, MutexGuard};

use netforge_core::{ByteBuf, ByteOrder, ErrorCode, Result, net_error};

use crate::socket::{Socket, WriteOutcome};

struct SendState {
    buf: ByteBuf,
    /// A flush is in progress; further appends ride along and are
    /// pushed out by the next write-ready event.
    writing: bool,
}

/// Per-connection send buffer with immediate-flush semantics.
///
/// Writers append under the send lock and kick off a flush; whatever the
/// kernel does not take stays buffered and is flushed again on the next
/// write-readiness event, with the engine re-armed through the socket's
/// update hook.
pub struct SocketCon {
    sock: Arc<Socket>,
    send: Mutex<SendState>,
}

impl SocketCon {
    pub fn new(sock: Arc<Socket>) -> Self {
        Self {
            sock,
            send: Mutex::new(SendState { buf: ByteBuf::new(ByteOrder::network()), writing: false }),
        }
    }

    pub fn sock(&self) -> &Arc<Socket> {
        &self.sock
    }

    fn lock_send(&self) -> MutexGuard<'_, SendState> {
        self.send.lock().expect("send mutex poisoned")
    }

    /// Serializes into the send buffer under the send lock, then starts
    /// flushing. `IoAgain` from the socket is not an error here; the
    /// remainder goes out on write readiness.
    pub fn send_with(&self, fill: impl FnOnce(&mut ByteBuf) -> Result<()>) -> Result<()> {
        let mut st = self.lock_send();
        fill(&mut st.buf)?;
        if st.writing {
            return Ok(());
        }
        st.writing = true;
        match self.flush_locked(&mut st) {
            Ok(()) => Ok(()),
            Err(e) if e.is_again() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Pushes buffered bytes out; called on write-ready events.
    pub fn flush(&self) -> Result<()> {
        let mut st = self.lock_send();
        self.flush_locked(&mut st)
    }

    fn flush_locked(&self, st: &mut SendState) -> Result<()> {
        let res = self.sock.write(st.buf.unread());
        match res {
            Ok(outcome) => {
                st.buf.mark_processed(outcome.written()).ok();
                st.buf.discard_processed();
                match outcome {
                    WriteOutcome::Complete(_) => {
                        st.writing = false;
                        Ok(())
                    }
                    WriteOutcome::Again(_) => {
                        self.sock.update_engine();
                        Err(net_error!(ErrorCode::IoAgain))
                    }
                }
            }
            Err(e) => {
                self.sock.update_engine();
                Err(e)
            }
        }
    }

    /// Closes the socket and tells the engine.
    pub fn close(&self) {
        let _ = self.sock.close();
        self.sock.update_engine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::SocketFamily;
    use crate::socket::{Socket, SocketKind};
    use crate::testutil::{drain_nonblocking, nonblocking_pair};

    fn con_with_peer() -> (SocketCon, std::os::fd::RawFd) {
        let (backend, read_fd) = nonblocking_pair();
        let sock = Socket::from_backend(SocketFamily::Ipv4, SocketKind::Stream, Box::new(backend));
        (SocketCon::new(sock), read_fd)
    }

    #[test]
    fn small_send_flushes_immediately() {
        let (con, read_fd) = con_with_peer();
        con.send_with(|buf| {
            buf.put_bytes(b"ping")?;
            Ok(())
        })
        .unwrap();

        let mut got = Vec::new();
        drain_nonblocking(read_fd, &mut got);
        assert_eq!(got, b"ping");
    }

    #[test]
    fn backlogged_bytes_flush_on_write_ready() {
        let (con, read_fd) = con_with_peer();
        // Well past any socketpair buffer, forcing the partial path.
        let payload = vec![0x5Au8; 4 * 1024 * 1024];
        con.send_with(|buf| {
            buf.put_bytes(&payload)?;
            Ok(())
        })
        .unwrap();

        let mut got = Vec::new();
        loop {
            drain_nonblocking(read_fd, &mut got);
            if got.len() >= payload.len() {
                break;
            }
            match con.flush() {
                Ok(()) => drain_nonblocking(read_fd, &mut got),
                Err(e) if e.is_again() => {}
                Err(e) => panic!("flush failed: {e}"),
            }
        }
        assert_eq!(got.len(), payload.len());
        assert!(got.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn appends_during_backlog_ride_along() {
        let (con, read_fd) = con_with_peer();
        let big = vec![1u8; 2 * 1024 * 1024];
        con.send_with(|buf| {
            buf.put_bytes(&big)?;
            Ok(())
        })
        .unwrap();
        con.send_with(|buf| {
            buf.put_bytes(b"tail-marker")?;
            Ok(())
        })
        .unwrap();

        let mut got = Vec::new();
        let total = big.len() + b"tail-marker".len();
        while got.len() < total {
            drain_nonblocking(read_fd, &mut got);
            let _ = con.flush();
        }
        assert_eq!(&got[big.len()..], b"tail-marker");
    }

    #[test]
    fn close_is_idempotent() {
        let (con, _read_fd) = con_with_peer();
        con.close();
        con.close();
        assert!(con.sock().is_closed());
    }
}
