//! Server- and client-side WebSocket connection over the stream engine.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use netforge_core::{ByteBuf, ByteOrder, Result};
use netforge_net::{RecvStatus, Socket, SocketCon};

use super::frame;
use super::parser::WsParser;
use super::{WsMessage, WsMsgType, WsMode};

struct Reader {
    recv: ByteBuf,
    parser: WsParser,
}

/// One upgraded WebSocket connection.
pub struct WsConn {
    mode: WsMode,
    con: SocketCon,
    reader: Mutex<Reader>,
}

impl WsConn {
    pub(crate) fn new(mode: WsMode, sock: Arc<Socket>) -> Self {
        Self {
            mode,
            con: SocketCon::new(sock),
            reader: Mutex::new(Reader {
                recv: ByteBuf::new(ByteOrder::network()),
                parser: WsParser::new(mode),
            }),
        }
    }

    pub fn sock(&self) -> &Arc<Socket> {
        self.con.sock()
    }

    pub fn remote_addr(&self) -> Result<SocketAddr> {
        self.con.sock().remote_addr()
    }

    /// Pulls bytes from the socket and runs the parser until a message
    /// completes or everything would block.
    pub(crate) fn read(&self) -> RecvStatus {
        let mut reader = self.reader.lock().expect("ws reader poisoned");
        let reader = &mut *reader;
        loop {
            if reader.recv.ensure(512).is_err() {
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

    /// The message completed by the last [`read`](Self::read), stamped
    /// with this connection.
    pub(crate) fn take_msg(self: &Arc<Self>) -> WsMessage {
        let mut msg = self.reader.lock().expect("ws reader poisoned").parser.take_msg();
        msg.con = Some(Arc::clone(self));
        msg
    }

    /// Sends one single-frame message. Client connections mask the
    /// payload with a fresh key.
    pub fn send(&self, kind: WsMsgType, payload: &[u8]) -> Result<()> {
        let mask = match self.mode {
            WsMode::Server => None,
            WsMode::Client => Some(rand::random::<u32>()),
        };
        self.con.send_with(|buf| {
            frame::write_frame(buf, kind, payload, mask)?;
            Ok(())
        })
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(WsMsgType::Text, text.as_bytes())
    }

    /// Flushes buffered output on write readiness.
    pub(crate) fn flush(&self) -> Result<()> {
        self.con.flush()
    }

    pub fn close(&self) {
        self.con.close();
    }
}
