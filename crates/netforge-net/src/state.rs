use bitflags::bitflags;

/// Per-socket status flags.
///
/// The engine derives notifier interests from `nbl_read`/`nbl_write`;
/// with `nbl_auto` set, the socket flips those two itself after each
/// read/write depending on which direction last blocked.
#[derive(Default, Clone, Copy, Debug)]
pub struct SocketState {
    pub closed: bool,
    pub err: bool,
    pub hup: bool,

    /// Last read blocked; resume when readable.
    pub read_again: bool,
    /// Last write blocked; resume when writable.
    pub write_again: bool,
    /// TLS read needs the socket to become writable first.
    pub read_again_when_writeable: bool,
    /// TLS write needs the socket to become readable first.
    pub write_again_when_readable: bool,

    /// Read side currently dispatched to a worker.
    pub read_locked: bool,
    /// Write side currently dispatched to a worker.
    pub write_locked: bool,

    pub nonblocking: bool,

    /// Request readiness notification for reads.
    pub nbl_read: bool,
    /// Request readiness notification for writes.
    pub nbl_write: bool,
    /// Engine toggles `nbl_read`/`nbl_write` from the last operation.
    pub nbl_auto: bool,
}

impl SocketState {
    /// The socket can still be used for I/O.
    pub fn usable(&self) -> bool {
        !self.closed && !self.err
    }
}

bitflags! {
    /// Event mask reported by the readiness notifier.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EventSet: u8 {
        const READ = 1;
        const WRITE = 1 << 1;
        const CLOSED = 1 << 2;
        const ERROR = 1 << 3;
    }
}

/// Outcome of feeding received bytes to a protocol parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvStatus {
    /// A complete message was parsed.
    Complete,
    /// More input is needed.
    Again,
    /// The input violates the protocol; the connection must be closed.
    Invalid,
    /// A non-protocol failure occurred (e.g. a buffer limit).
    Error,
    /// The peer closed the connection.
    Closed,
}
