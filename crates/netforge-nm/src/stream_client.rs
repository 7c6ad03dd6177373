//! Blocking NM stream client.

use std::sync::Arc;
use std::time::Duration;

use netforge_core::{ByteBuf, ByteOrder, ErrorCode, Result, net_error};
use netforge_net::addr::SocketFamily;
use netforge_net::{RecvStatus, Socket, TlsClientOpts, WriteOutcome};

use crate::message::NmMessage;
use crate::wire::{self, NmParser};

#[derive(Clone, Debug)]
pub struct NmStreamClientOpts {
    pub host: String,
    pub port: u16,
    pub family: SocketFamily,
    pub tls: Option<TlsClientOpts>,
}

/// Synchronous request/response endpoint for the NM stream protocol.
pub struct NmStreamClient {
    sock: Option<Arc<Socket>>,
    buf: ByteBuf,
    parser: NmParser,
    recv_timeout: Option<Duration>,
}

impl Default for NmStreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NmStreamClient {
    pub fn new() -> Self {
        Self {
            sock: None,
            buf: ByteBuf::new(ByteOrder::network()),
            parser: NmParser::new(),
            recv_timeout: None,
        }
    }

    pub fn set_recv_timeout(&mut self, timeout: Duration) {
        self.recv_timeout = Some(timeout);
    }

    pub fn connect(&mut self, opts: &NmStreamClientOpts) -> Result<()> {
        if self.sock.is_some() {
            return Err(net_error!(ErrorCode::InvalidState, "already connected"));
        }

        let sock = match &opts.tls {
            Some(tls) => Socket::new_tls_client(opts.family, tls)?,
            None => Socket::new_stream(opts.family)?,
        };
        if let Some(timeout) = self.recv_timeout {
            sock.set_recv_timeout(timeout)?;
        }
        sock.connect(&opts.host, opts.port)?;
        self.sock = Some(sock);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        let sock = self
            .sock
            .take()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "not connected"))?;
        sock.close()
    }

    /// Encodes and writes one message; anything short is an error on
    /// this blocking path.
    pub fn send(&mut self, msg: &NmMessage) -> Result<()> {
        let sock = self
            .sock
            .as_ref()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "not connected"))?;

        let mut out = ByteBuf::new(ByteOrder::network());
        wire::encode(msg, &mut out)?;
        match sock.write(out.as_slice())? {
            WriteOutcome::Complete(_) => Ok(()),
            WriteOutcome::Again(n) => Err(net_error!(ErrorCode::IoPartial, "short send: {n}")),
        }
    }

    /// Blocks until the next complete message arrives.
    pub fn recv(&mut self) -> Result<NmMessage> {
        let sock = self
            .sock
            .as_ref()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "not connected"))?;

        loop {
            match self.parser.run(&mut self.buf) {
                RecvStatus::Complete => {
                    let msg = self
                        .parser
                        .take_msg()
                        .ok_or_else(|| net_error!(ErrorCode::InvalidState, "no message"))?;
                    self.buf.discard_processed();
                    return Ok(msg);
                }
                RecvStatus::Again => {}
                RecvStatus::Invalid => {
                    return Err(net_error!(ErrorCode::IoProtocol, "malformed message"));
                }
                _ => return Err(net_error!(ErrorCode::Generic, "receive failed")),
            }

            self.buf.ensure(512)?;
            match sock.read(self.buf.space_mut()) {
                Ok(n) => self.buf.add_used(n),
                Err(e) if e.is_again() => {
                    // A blocking socket only reports this on timeout.
                    return Err(net_error!(ErrorCode::IoTimeout, "receive timed out"));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
