//! HTTP/1.x server over the stream engine, with WebSocket takeover.

use std::any::Any;
use std::sync::{Arc, Mutex};

use netforge_core::{ByteBuf, ByteOrder, ErrorCode, Result, net_error};
use netforge_net::{
    EmitStatus, EmitterChain, RecvStatus, Socket, StreamControl, StreamHandler, StreamServer,
    StreamServerOpts, TlsServerOpts,
};
use tracing::{debug, warn};

use crate::parser::{HttpParser, ParserMode};
use crate::response::{ResponseAction, ResponseBuilder, ResponseMode};
use crate::ws::{WsConn, WsMessage, WsMode};
use crate::{Version, header};

pub type HttpControl = StreamControl;

#[derive(Clone, Debug)]
pub struct HttpServerOpts {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    /// Maximum notifier events per loop iteration.
    pub events: usize,
    pub threads: usize,
    pub tls: Option<TlsServerOpts>,
}

impl Default for HttpServerOpts {
    fn default() -> Self {
        Self { host: "localhost".to_owned(), port: 0, backlog: 25, events: 16, threads: 0, tls: None }
    }
}

/// Server callbacks. `request` runs once per parsed request; when it
/// leaves the response unsent the server answers `404 Not Found`.
pub trait HttpServerHandler: Send + Sync + 'static {
    fn server_ready(&self, _ctl: &HttpControl) {}
    fn worker_init(&self) {}
    fn worker_end(&self) {}

    fn request(&self, req: &crate::Request<'_>, res: &mut ResponseBuilder) -> Result<()>;

    fn ws_connect(&self, _con: &Arc<WsConn>) {}
    fn ws_message(&self, _msg: WsMessage) {}
    fn ws_close(&self, _con: &Arc<WsConn>) {}
}

struct HttpConnInner {
    recv: ByteBuf,
    parser: HttpParser,
    /// Processed bytes are dropped before the next request is read.
    clear: bool,
}

/// Connection state while a socket still speaks HTTP.
pub struct HttpConn {
    sock: Arc<Socket>,
    inner: Mutex<HttpConnInner>,
    /// Response bytes the socket did not take yet.
    emitter: Mutex<Option<EmitterChain>>,
}

impl HttpConn {
    fn new(sock: Arc<Socket>) -> Self {
        Self {
            sock,
            inner: Mutex::new(HttpConnInner {
                recv: ByteBuf::new(ByteOrder::Little),
                parser: HttpParser::new(ParserMode::Request),
                clear: false,
            }),
            emitter: Mutex::new(None),
        }
    }

    pub(crate) fn sock(&self) -> &Arc<Socket> {
        &self.sock
    }

    pub(crate) fn set_emitter(&self, chain: EmitterChain) {
        *self.emitter.lock().expect("emitter mutex poisoned") = Some(chain);
    }

    /// Resumes a parked response on write readiness.
    fn flush(&self) -> Result<EmitStatus> {
        let mut slot = self.emitter.lock().expect("emitter mutex poisoned");
        let Some(chain) = slot.as_mut() else {
            return Ok(EmitStatus::Complete);
        };
        match chain.try_write(&self.sock) {
            Ok(EmitStatus::Complete) => {
                *slot = None;
                Ok(EmitStatus::Complete)
            }
            Ok(EmitStatus::Again) => Ok(EmitStatus::Again),
            Err(e) => {
                *slot = None;
                Err(e)
            }
        }
    }
}

struct Engine<H: HttpServerHandler> {
    handler: H,
}

pub(crate) struct WorkerState {
    res: ResponseBuilder,
}

impl<H: HttpServerHandler> StreamHandler for Engine<H> {
    type Worker = WorkerState;

    fn server_ready(&self, ctl: &StreamControl) {
        self.handler.server_ready(ctl);
    }

    fn worker_init(&self) -> Self::Worker {
        self.handler.worker_init();
        WorkerState { res: ResponseBuilder::new() }
    }

    fn worker_end(&self, _worker: &mut Self::Worker) {
        self.handler.worker_end();
    }

    fn connected(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        let _ = sock.set_tcp_nodelay(true);
        sock.enable_auto_readiness();
        let con = Arc::new(HttpConn::new(Arc::clone(sock)));
        sock.set_user_data(Some(con as Arc<dyn Any + Send + Sync>));
    }

    fn disconnected(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        if let Some(data) = sock.user_data() {
            if let Ok(ws) = data.downcast::<WsConn>() {
                self.handler.ws_close(&ws);
            }
        }
    }

    fn can_read(&self, worker: &mut Self::Worker, sock: &Arc<Socket>) {
        loop {
            let Some(data) = sock.user_data() else { return };

            if let Ok(http) = Arc::clone(&data).downcast::<HttpConn>() {
                match http_read(&http) {
                    RecvStatus::Complete => {
                        if !self.handle_request(worker, &http) {
                            return;
                        }
                    }
                    RecvStatus::Again => return,
                    _ => {
                        let _ = sock.close();
                        return;
                    }
                }
            } else if let Ok(ws) = data.downcast::<WsConn>() {
                match ws.read() {
                    RecvStatus::Complete => self.handler.ws_message(ws.take_msg()),
                    RecvStatus::Again => return,
                    _ => {
                        // Protocol violations close without a reply.
                        let _ = sock.close();
                        return;
                    }
                }
            } else {
                return;
            }
        }
    }

    fn can_write(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        let Some(data) = sock.user_data() else { return };

        if let Ok(http) = Arc::clone(&data).downcast::<HttpConn>() {
            match http.flush() {
                Ok(_) => {}
                Err(e) if e.is_again() => {}
                Err(_) => {
                    let _ = sock.close();
                }
            }
        } else if let Ok(ws) = data.downcast::<WsConn>() {
            match ws.flush() {
                Ok(()) => {}
                Err(e) if e.is_again() => {}
                Err(_) => {
                    let _ = sock.close();
                }
            }
        }
    }
}

impl<H: HttpServerHandler> Engine<H> {
    /// Dispatches one complete request. Returns whether the read loop
    /// should look for another request on this connection.
    fn handle_request(&self, worker: &mut WorkerState, con: &Arc<HttpConn>) -> bool {
        let mut guard = con.inner.lock().expect("http conn poisoned");
        let inner = &mut *guard;

        let version;
        {
            let Ok(req) = inner.parser.request(&inner.recv) else {
                let _ = con.sock.close();
                return false;
            };
            version = req.version;

            worker.res.prepare(Arc::clone(con), req.version, req.headers.get(header::CONNECTION));
            if let Err(e) = self.handler.request(&req, &mut worker.res) {
                if !e.is_not_handled() {
                    debug!(%e, "request handler failed");
                }
            }
        }

        inner.parser.reset();
        inner.clear = true;
        drop(guard);

        if !worker.res.was_sent() {
            if worker.res.was_started() {
                // A half-built response cannot be completed sensibly.
                let _ = con.sock.close();
                return false;
            }
            if let Err(e) = send_not_found(worker, con, version) {
                warn!(%e, "404 fallback failed");
                let _ = con.sock.close();
                return false;
            }
        }

        match worker.res.action() {
            ResponseAction::CloseCon => {
                let _ = con.sock.close();
                false
            }
            ResponseAction::KeepCon => true,
            ResponseAction::UpgradeWs => {
                let ws = Arc::new(WsConn::new(WsMode::Server, Arc::clone(&con.sock)));
                con.sock.set_user_data(Some(Arc::clone(&ws) as Arc<dyn Any + Send + Sync>));
                self.handler.ws_connect(&ws);
                false
            }
        }
    }
}

fn send_not_found(worker: &mut WorkerState, con: &Arc<HttpConn>, version: Version) -> Result<()> {
    worker.res.prepare(Arc::clone(con), version, None);
    worker.res.begin(ResponseMode::Fixed, 404)?;
    worker.res.header(header::CONTENT_TYPE, "text/plain")?;
    worker.res.body_str("404 - Not found")?;
    worker.res.end()
}

/// Reads from the socket and feeds the request parser until a request
/// completes or input runs dry.
fn http_read(con: &Arc<HttpConn>) -> RecvStatus {
    let mut guard = con.inner.lock().expect("http conn poisoned");
    let inner = &mut *guard;

    if inner.clear {
        inner.clear = false;
        inner.recv.discard_processed();
    }

    loop {
        if inner.recv.ensure(512).is_err() {
            return RecvStatus::Error;
        }

        let mut socket_blocked = false;
        match con.sock.read(inner.recv.space_mut()) {
            Ok(n) => inner.recv.add_used(n),
            Err(e) if e.is_again() => {
                if inner.recv.avail() == 0 {
                    return RecvStatus::Again;
                }
                socket_blocked = true;
            }
            Err(e) if e.is_closed() => return RecvStatus::Closed,
            Err(_) => return RecvStatus::Error,
        }

        match inner.parser.run(&mut inner.recv) {
            RecvStatus::Again => {
                if socket_blocked {
                    return RecvStatus::Again;
                }
            }
            status => return status,
        }
    }
}

pub struct HttpServer;

impl HttpServer {
    /// Binds and serves until stopped through the control handle passed
    /// to `server_ready`. Blocks the calling thread.
    pub fn run<H: HttpServerHandler>(opts: &HttpServerOpts, handler: H) -> Result<()> {
        if opts.port == 0 && opts.host.is_empty() {
            return Err(net_error!(ErrorCode::InvalidArg, "no bind address"));
        }
        let stream_opts = StreamServerOpts {
            host: opts.host.clone(),
            port: opts.port,
            family: None,
            backlog: opts.backlog,
            max_events: opts.events,
            threads: opts.threads,
            tls: opts.tls.clone(),
        };
        StreamServer::run(&stream_opts, Engine { handler })
    }
}
