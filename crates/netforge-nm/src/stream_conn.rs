//! One NM client connection on the server side.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use netforge_core::{ByteBuf, ByteOrder, Result};
use netforge_net::{RecvStatus, Socket, SocketCon};

use crate::message::NmMessage;
use crate::wire::{self, NmParser};

struct Reader {
    recv: ByteBuf,
    parser: NmParser,
}

pub struct NmStreamCon {
    con: SocketCon,
    reader: Mutex<Reader>,
}

impl NmStreamCon {
    pub(crate) fn new(sock: Arc<Socket>) -> Self {
        Self {
            con: SocketCon::new(sock),
            reader: Mutex::new(Reader {
                recv: ByteBuf::new(ByteOrder::network()),
                parser: NmParser::new(),
            }),
        }
    }

    pub fn sock(&self) -> &Arc<Socket> {
        self.con.sock()
    }

    pub fn remote_addr(&self) -> Result<SocketAddr> {
        self.con.sock().remote_addr()
    }

    /// Encodes and sends one message; unwritten bytes are flushed on
    /// write readiness.
    pub fn send(&self, msg: &NmMessage) -> Result<()> {
        self.con.send_with(|buf| wire::encode(msg, buf))
    }

    /// Pulls bytes from the socket until a message completes or the
    /// socket runs dry.
    pub(crate) fn read(&self) -> RecvStatus {
        let mut reader = self.reader.lock().expect("nm reader poisoned");
        let reader = &mut *reader;
        loop {
            if reader.recv.ensure(1024).is_err() {
                return RecvStatus::Error;
            }

            let mut socket_blocked = false;
            match self.con.sock().read(reader.recv.space_mut()) {
                Ok(n) => reader.recv.add_used(n),
                Err(e) if e.is_again() => {
                    if reader.recv.avail() == 0 {
                        return RecvStatus::Again;
                    }
                    socket_blocked = true;
                }
                Err(e) if e.is_closed() => return RecvStatus::Closed,
                Err(_) => return RecvStatus::Error,
            }

            match reader.parser.run(&mut reader.recv) {
                RecvStatus::Again => {
                    if socket_blocked {
                        return RecvStatus::Again;
                    }
                }
                status => return status,
            }
        }
    }

    pub(crate) fn take_msg(&self) -> Option<NmMessage> {
        let mut reader = self.reader.lock().expect("nm reader poisoned");
        let msg = reader.parser.take_msg();
        reader.recv.discard_processed();
        msg
    }

    /// Flushes buffered output on write readiness.
    pub(crate) fn flush(&self) -> Result<()> {
        self.con.flush()
    }

    pub fn close(&self) {
        self.con.close();
    }
}
