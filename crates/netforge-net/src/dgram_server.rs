//! Datagram server engine: one receiving socket, optional worker pool
//! behind a bounded queue.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use netforge_core::{ByteBuf, ByteOrder, ErrorCode, Result, net_error};
use tracing::debug;

use crate::addr::{self, SocketFamily};
use crate::poller::{Poller, PollerHandle};
use crate::socket::Socket;
use crate::state::EventSet;

/// Largest datagram the receive path accepts.
const DGRAM_RECV_SIZE: usize = 64 * 1024;

/// One received datagram.
pub struct Dgram {
    pub buf: ByteBuf,
    pub src: SocketAddr,
}

#[derive(Clone, Debug)]
pub struct DgramServerOpts {
    pub host: String,
    pub port: u16,
    pub family: Option<SocketFamily>,
    /// Worker threads; 0 dispatches on the receive thread.
    pub threads: usize,
    /// Bounded queue depth; 0 means `2 * threads`.
    pub queue_limit: usize,
}

impl Default for DgramServerOpts {
    fn default() -> Self {
        Self { host: "localhost".to_owned(), port: 0, family: None, threads: 0, queue_limit: 0 }
    }
}

pub trait DgramHandler: Send + Sync + 'static {
    type Worker: Send + 'static;

    fn server_ready(&self, _ctl: &DgramControl) {}
    fn worker_init(&self) -> Self::Worker;
    fn worker_end(&self, _worker: &mut Self::Worker) {}

    fn recv(&self, worker: &mut Self::Worker, srv: &DgramSender, dgram: Dgram);
}

/// Reply-side handle passed to the receive callback.
#[derive(Clone)]
pub struct DgramSender {
    sock: Arc<Socket>,
}

impl DgramSender {
    /// Sends one datagram; anything short of a full send is an error.
    pub fn send(&self, data: &[u8], to: &SocketAddr) -> Result<()> {
        let sent = self.sock.dgram_send(data, to)?;
        if sent != data.len() {
            return Err(net_error!(ErrorCode::IoUnknown, "short datagram send: {sent}"));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct DgramControl {
    running: Arc<AtomicBool>,
    poller: Arc<PollerHandle>,
    sock: Arc<Socket>,
}

impl DgramControl {
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(net_error!(ErrorCode::InvalidState, "server not running"));
        }
        self.poller.interrupt();
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.sock.local_addr()
    }
}

struct Queue {
    dgrams: Mutex<VecDeque<Dgram>>,
    not_empty: Condvar,
    not_full: Condvar,
    limit: usize,
}

struct Shared<H: DgramHandler> {
    handler: H,
    running: Arc<AtomicBool>,
    sender: DgramSender,
    queue: Queue,
}

impl<H: DgramHandler> Shared<H> {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Blocks on the not-full condition under backpressure; a stop
    /// request breaks the wait and drops the datagram.
    fn enqueue(&self, dgram: Dgram) {
        let mut dgrams = self.queue.dgrams.lock().expect("dgram queue poisoned");
        while dgrams.len() >= self.queue.limit {
            if !self.running() {
                return;
            }
            dgrams = self.queue.not_full.wait(dgrams).expect("dgram queue poisoned");
        }
        dgrams.push_back(dgram);
        self.queue.not_empty.notify_all();
    }
}

pub struct DgramServer;

impl DgramServer {
    /// Binds and serves until [`DgramControl::stop`]. Blocks the caller.
    pub fn run<H: DgramHandler>(opts: &DgramServerOpts, handler: H) -> Result<()> {
        let family = opts.family.unwrap_or_else(|| addr::sniff_family(&opts.host));
        let sock = Socket::new_dgram(family)?;
        sock.bind(&opts.host, opts.port)?;
        sock.set_nonblocking(true)?;

        let mut poller = Poller::new(1)?;
        sock.set_readiness(true, false);
        poller.handle().add(&sock)?;

        let running = Arc::new(AtomicBool::new(true));
        let limit = if opts.queue_limit == 0 { opts.threads * 2 } else { opts.queue_limit };
        let shared = Arc::new(Shared {
            handler,
            running: Arc::clone(&running),
            sender: DgramSender { sock: Arc::clone(&sock) },
            queue: Queue {
                dgrams: Mutex::new(VecDeque::new()),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                limit: limit.max(1),
            },
        });

        let mut workers = Vec::with_capacity(opts.threads);
        for i in 0..opts.threads {
            let shared = Arc::clone(&shared);
            let worker = thread::Builder::new()
                .name(format!("netforge-dgram-{i}"))
                .spawn(move || worker_run(&shared))
                .map_err(|e| net_error!(ErrorCode::Generic, "spawn worker: {e}"))?;
            workers.push(worker);
        }

        let ctl = DgramControl {
            running: Arc::clone(&running),
            poller: poller.handle(),
            sock: Arc::clone(&sock),
        };
        shared.handler.server_ready(&ctl);

        let result = recv_loop(&shared, &mut poller, &sock, opts.threads);

        shared.running.store(false, Ordering::SeqCst);
        shared.queue.not_empty.notify_all();
        shared.queue.not_full.notify_all();
        for worker in workers {
            let _ = worker.join();
        }

        poller.handle().remove(&sock);
        let _ = sock.close();

        result
    }
}

fn recv_loop<H: DgramHandler>(
    shared: &Arc<Shared<H>>,
    poller: &mut Poller,
    sock: &Arc<Socket>,
    threads: usize,
) -> Result<()> {
    let mut events = Vec::new();
    let mut direct_worker = if threads == 0 { Some(shared.handler.worker_init()) } else { None };

    let result = loop {
        if !shared.running() {
            break Ok(());
        }
        if let Err(e) = poller.run(&mut events) {
            break Err(e);
        }
        let Some(event) = events.first() else { continue };
        if !event.events.contains(EventSet::READ) {
            break Err(net_error!(ErrorCode::IoUnknown, "datagram socket failed"));
        }

        let mut buf = ByteBuf::new(ByteOrder::network());
        if let Err(e) = buf.ensure(DGRAM_RECV_SIZE) {
            break Err(net_error!(e, "datagram buffer"));
        }
        let (n, src) = match sock.dgram_recv(buf.space_mut()) {
            Ok(pair) => pair,
            Err(e) if e.is_again() => {
                poller.handle().rearm(sock)?;
                continue;
            }
            Err(e) => break Err(e),
        };
        buf.add_used(n);

        let dgram = Dgram { buf, src };
        match direct_worker.as_mut() {
            Some(worker) => shared.handler.recv(worker, &shared.sender, dgram),
            None => shared.enqueue(dgram),
        }

        if let Err(e) = poller.handle().rearm(sock) {
            break Err(e);
        }
    };

    shared.running.store(false, Ordering::SeqCst);

    if let Some(mut worker) = direct_worker.take() {
        shared.handler.worker_end(&mut worker);
    }
    result
}

fn worker_run<H: DgramHandler>(shared: &Arc<Shared<H>>) {
    let mut worker = shared.handler.worker_init();

    'running: while shared.running() {
        let dgram = {
            let mut dgrams = shared.queue.dgrams.lock().expect("dgram queue poisoned");
            loop {
                if let Some(dgram) = dgrams.pop_front() {
                    shared.queue.not_full.notify_all();
                    break dgram;
                }
                if !shared.running() {
                    break 'running;
                }
                dgrams = shared.queue.not_empty.wait(dgrams).expect("dgram queue poisoned");
            }
        };
        shared.handler.recv(&mut worker, &shared.sender, dgram);
    }

    debug!("datagram worker exiting");
    shared.handler.worker_end(&mut worker);
}
