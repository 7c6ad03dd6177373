//! NM datagram server.

use std::net::SocketAddr;

use netforge_core::{ByteBuf, ByteOrder, Result};
use netforge_net::addr::SocketFamily;
use netforge_net::{Dgram, DgramControl, DgramHandler, DgramSender, DgramServer, DgramServerOpts};
use tracing::debug;

use crate::message::NmMessage;
use crate::wire;

#[derive(Clone, Debug)]
pub struct NmDgramServerOpts {
    pub host: String,
    pub port: u16,
    pub family: Option<SocketFamily>,
    pub threads: usize,
    /// Bounded queue depth; 0 means `2 * threads`.
    pub queue_limit: usize,
}

impl Default for NmDgramServerOpts {
    fn default() -> Self {
        Self { host: "localhost".to_owned(), port: 0, family: None, threads: 0, queue_limit: 0 }
    }
}

/// Reply handle handed to the message callback.
pub struct NmDgramResponder<'a> {
    sender: &'a DgramSender,
}

impl NmDgramResponder<'_> {
    /// Encodes and sends one message as a single datagram.
    pub fn send(&self, msg: &NmMessage, to: &SocketAddr) -> Result<()> {
        let mut buf = ByteBuf::new(ByteOrder::network());
        wire::encode(msg, &mut buf)?;
        self.sender.send(buf.as_slice(), to)
    }
}

pub trait NmDgramHandler: Send + Sync + 'static {
    fn server_ready(&self, _ctl: &DgramControl) {}
    fn worker_init(&self) {}
    fn worker_end(&self) {}

    fn msg_recv(&self, responder: &NmDgramResponder<'_>, msg: NmMessage, src: SocketAddr);
}

struct Engine<H: NmDgramHandler> {
    handler: H,
}

impl<H: NmDgramHandler> DgramHandler for Engine<H> {
    type Worker = ();

    fn server_ready(&self, ctl: &DgramControl) {
        self.handler.server_ready(ctl);
    }

    fn worker_init(&self) -> Self::Worker {
        self.handler.worker_init();
    }

    fn worker_end(&self, _worker: &mut Self::Worker) {
        self.handler.worker_end();
    }

    fn recv(&self, _worker: &mut Self::Worker, srv: &DgramSender, dgram: Dgram) {
        let Dgram { mut buf, src } = dgram;
        match wire::decode(&mut buf) {
            Ok(msg) => {
                self.handler.msg_recv(&NmDgramResponder { sender: srv }, msg, src);
            }
            Err(e) => {
                // Malformed datagrams are dropped.
                debug!(%e, %src, "nm datagram discarded");
            }
        }
    }
}

pub struct NmDgramServer;

impl NmDgramServer {
    /// Binds and serves until stopped through the control handle.
    /// Blocks the calling thread.
    pub fn run<H: NmDgramHandler>(opts: &NmDgramServerOpts, handler: H) -> Result<()> {
        let dgram_opts = DgramServerOpts {
            host: opts.host.clone(),
            port: opts.port,
            family: opts.family,
            threads: opts.threads,
            queue_limit: opts.queue_limit,
        };
        DgramServer::run(&dgram_opts, Engine { handler })
    }
}
