//! NM stream server over the stream engine.

use std::any::Any;
use std::sync::Arc;

use netforge_core::Result;
use netforge_net::{
    RecvStatus, Socket, StreamControl, StreamHandler, StreamServer, StreamServerOpts,
    TlsServerOpts,
};
use tracing::debug;

use crate::message::NmMessage;
use crate::stream_conn::NmStreamCon;

pub type NmControl = StreamControl;

#[derive(Clone, Debug)]
pub struct NmStreamServerOpts {
    pub host: String,
    pub port: u16,
    pub threads: usize,
    pub tls: Option<TlsServerOpts>,
}

impl Default for NmStreamServerOpts {
    fn default() -> Self {
        Self { host: "localhost".to_owned(), port: 0, threads: 0, tls: None }
    }
}

pub trait NmStreamHandler: Send + Sync + 'static {
    fn server_ready(&self, _ctl: &NmControl) {}
    fn worker_init(&self) {}
    fn worker_end(&self) {}

    fn client_connect(&self, _con: &Arc<NmStreamCon>) {}
    fn client_disconnect(&self, _con: &Arc<NmStreamCon>) {}
    fn client_msg(&self, con: &Arc<NmStreamCon>, msg: NmMessage);
}

struct Engine<H: NmStreamHandler> {
    handler: H,
}

impl<H: NmStreamHandler> StreamHandler for Engine<H> {
    type Worker = ();

    fn server_ready(&self, ctl: &StreamControl) {
        self.handler.server_ready(ctl);
    }

    fn worker_init(&self) -> Self::Worker {
        self.handler.worker_init();
    }

    fn worker_end(&self, _worker: &mut Self::Worker) {
        self.handler.worker_end();
    }

    fn connected(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        sock.enable_auto_readiness();
        let con = Arc::new(NmStreamCon::new(Arc::clone(sock)));
        sock.set_user_data(Some(Arc::clone(&con) as Arc<dyn Any + Send + Sync>));
        self.handler.client_connect(&con);
    }

    fn disconnected(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        if let Some(data) = sock.user_data() {
            if let Ok(con) = data.downcast::<NmStreamCon>() {
                self.handler.client_disconnect(&con);
            }
        }
    }

    fn can_read(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        let Some(data) = sock.user_data() else { return };
        let Ok(con) = data.downcast::<NmStreamCon>() else { return };

        loop {
            match con.read() {
                RecvStatus::Complete => {
                    let Some(msg) = con.take_msg() else {
                        let _ = sock.close();
                        return;
                    };
                    self.handler.client_msg(&con, msg);
                }
                RecvStatus::Again => return,
                status => {
                    debug!(?status, "nm connection failed");
                    let _ = sock.close();
                    return;
                }
            }
        }
    }

    fn can_write(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        let Some(data) = sock.user_data() else { return };
        let Ok(con) = data.downcast::<NmStreamCon>() else { return };
        match con.flush() {
            Ok(()) => {}
            Err(e) if e.is_again() => {}
            Err(_) => {
                let _ = sock.close();
            }
        }
    }
}

pub struct NmStreamServer;

impl NmStreamServer {
    /// Binds and serves until stopped through the control handle.
    /// Blocks the calling thread.
    pub fn run<H: NmStreamHandler>(opts: &NmStreamServerOpts, handler: H) -> Result<()> {
        let stream_opts = StreamServerOpts {
            host: opts.host.clone(),
            port: opts.port,
            family: None,
            backlog: 25,
            max_events: 16,
            threads: opts.threads,
            tls: opts.tls.clone(),
        };
        StreamServer::run(&stream_opts, Engine { handler })
    }
}
