//! One-shot NM datagram client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use netforge_core::{ByteBuf, ByteOrder, ErrorCode, Result, net_error};
use netforge_net::addr::SocketFamily;
use netforge_net::Socket;

use crate::message::NmMessage;
use crate::wire;

/// Largest datagram the receive path accepts.
const DGRAM_RECV_SIZE: usize = 64 * 1024;

pub struct NmDgramClient {
    sock: Arc<Socket>,
}

impl NmDgramClient {
    pub fn new(family: SocketFamily) -> Result<Self> {
        Ok(Self { sock: Socket::new_dgram(family)? })
    }

    pub fn set_recv_timeout(&self, timeout: Duration) -> Result<()> {
        self.sock.set_recv_timeout(timeout)
    }

    /// Encodes and sends one message as a single datagram; a short send
    /// is reported as a partial transfer.
    pub fn send(&self, msg: &NmMessage, to: &SocketAddr) -> Result<()> {
        let mut buf = ByteBuf::new(ByteOrder::network());
        wire::encode(msg, &mut buf)?;
        let sent = self.sock.dgram_send(buf.as_slice(), to)?;
        if sent != buf.used() {
            return Err(net_error!(ErrorCode::IoPartial, "short datagram send: {sent}"));
        }
        Ok(())
    }

    /// Blocks for one datagram and decodes it.
    pub fn recv(&self) -> Result<(NmMessage, SocketAddr)> {
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.ensure(DGRAM_RECV_SIZE)?;
        let (n, src) = match self.sock.dgram_recv(buf.space_mut()) {
            Ok(pair) => pair,
            Err(e) if e.is_again() => {
                return Err(net_error!(ErrorCode::IoTimeout, "receive timed out"));
            }
            Err(e) => return Err(e),
        };
        buf.add_used(n);
        Ok((wire::decode(&mut buf)?, src))
    }
}
