//! Non-blocking stream server engine.
//!
//! One thread owns the readiness notifier. With `threads == 0` it also
//! runs every callback inline; with `threads >= 1` it feeds a shared
//! FIFO drained by worker threads. Per-socket ordering is preserved by
//! per-direction dispatch locks: a worker that finds the direction busy
//! requeues (close/error) or drops (read/write) the event, and the
//! holder picks the work up through its own drain-to-blocked loop plus
//! notifier rearm.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use netforge_core::{ErrorCode, Latch, Result, net_error};
use tracing::{debug, warn};

use crate::addr::{self, SocketFamily};
use crate::poller::{Poller, PollerHandle, SocketEvent};
use crate::socket::{EngineHook, Socket};
use crate::state::EventSet;
use crate::tls::TlsServerOpts;

#[derive(Clone, Debug)]
pub struct StreamServerOpts {
    pub host: String,
    pub port: u16,
    /// Resolved from `host` when absent.
    pub family: Option<SocketFamily>,
    pub backlog: u32,
    /// Maximum notifier events handled per loop iteration.
    pub max_events: usize,
    /// Worker threads; 0 runs every callback on the notifier thread.
    pub threads: usize,
    pub tls: Option<TlsServerOpts>,
}

impl Default for StreamServerOpts {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 0,
            family: None,
            backlog: 25,
            max_events: 16,
            threads: 0,
            tls: None,
        }
    }
}

/// The callback set driving a stream server.
///
/// `Worker` is per-worker scratch created by `worker_init`; in queued
/// mode each worker thread owns one, in direct mode the notifier thread
/// does.
pub trait StreamHandler: Send + Sync + 'static {
    type Worker: Send + 'static;

    fn server_ready(&self, _ctl: &StreamControl) {}
    fn worker_init(&self) -> Self::Worker;
    fn worker_end(&self, _worker: &mut Self::Worker) {}

    fn connected(&self, worker: &mut Self::Worker, sock: &Arc<Socket>);
    fn disconnected(&self, worker: &mut Self::Worker, sock: &Arc<Socket>);
    fn can_read(&self, worker: &mut Self::Worker, sock: &Arc<Socket>);
    fn can_write(&self, worker: &mut Self::Worker, sock: &Arc<Socket>);
    fn sock_error(&self, _worker: &mut Self::Worker, _sock: &Arc<Socket>) {}
}

/// Stop handle, valid while the server runs.
#[derive(Clone)]
pub struct StreamControl {
    running: Arc<AtomicBool>,
    poller: Arc<PollerHandle>,
    listener: Arc<Socket>,
}

impl StreamControl {
    /// Asks the server to shut down and wakes the notifier.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(net_error!(ErrorCode::InvalidState, "server not running"));
        }
        self.poller.interrupt();
        Ok(())
    }

    /// Bound address of the listening socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventKind {
    Accepted,
    Read,
    Write,
    Closed,
    Error,
}

struct Event {
    sock: Arc<Socket>,
    kind: EventKind,
}

struct Shared<H: StreamHandler> {
    handler: H,
    running: Arc<AtomicBool>,
    threads: usize,
    poller: Arc<PollerHandle>,

    queue: Mutex<VecDeque<Event>>,
    queue_cond: Condvar,
    /// Synthetic close/error events raised through the socket hook.
    relay: Mutex<Vec<Event>>,
    conns: Mutex<HashMap<RawFd, Arc<Socket>>>,

    drain_prepare: Latch,
    drain_run: Latch,
}

impl<H: StreamHandler> EngineHook for Shared<H> {
    fn socket_updated(&self, sock: &Arc<Socket>) {
        let state = sock.state();
        if state.err {
            self.push_relay(Event { sock: Arc::clone(sock), kind: EventKind::Error });
            self.poller.interrupt();
        } else if state.closed {
            self.push_relay(Event { sock: Arc::clone(sock), kind: EventKind::Closed });
            self.poller.interrupt();
        } else if state.read_again || state.write_again {
            if let Err(e) = self.poller.rearm(sock) {
                debug!(%e, "rearm from socket update");
            }
        }
    }
}

impl<H: StreamHandler> Shared<H> {
    fn push_relay(&self, event: Event) {
        self.relay.lock().expect("relay mutex poisoned").push(event);
    }

    fn requeue(&self, event: Event) {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        queue.push_back(event);
        self.queue_cond.notify_one();
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct StreamServer;

impl StreamServer {
    /// Binds, listens and runs until [`StreamControl::stop`]. Blocks the
    /// calling thread for the server's whole lifetime.
    pub fn run<H: StreamHandler>(opts: &StreamServerOpts, handler: H) -> Result<()> {
        let family = opts.family.unwrap_or_else(|| addr::sniff_family(&opts.host));
        let listener = match &opts.tls {
            Some(tls) => Socket::new_tls_server(family, tls)?,
            None => Socket::new_stream(family)?,
        };
        listener.set_nonblocking(true)?;
        listener.bind(&opts.host, opts.port)?;
        listener.listen(opts.backlog)?;

        let mut poller = Poller::new(opts.max_events)?;
        listener.set_readiness(true, false);
        poller.handle().add(&listener)?;

        let running = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(Shared {
            handler,
            running: Arc::clone(&running),
            threads: opts.threads,
            poller: poller.handle(),
            queue: Mutex::new(VecDeque::new()),
            queue_cond: Condvar::new(),
            relay: Mutex::new(Vec::new()),
            conns: Mutex::new(HashMap::new()),
            drain_prepare: Latch::new(opts.threads),
            drain_run: Latch::new(1),
        });

        let mut workers = Vec::with_capacity(opts.threads);
        for i in 0..opts.threads {
            let shared = Arc::clone(&shared);
            let worker = thread::Builder::new()
                .name(format!("netforge-worker-{i}"))
                .spawn(move || worker_run(&shared))
                .map_err(|e| net_error!(ErrorCode::Generic, "spawn worker: {e}"))?;
            workers.push(worker);
        }

        let ctl = StreamControl {
            running: Arc::clone(&running),
            poller: poller.handle(),
            listener: Arc::clone(&listener),
        };
        shared.handler.server_ready(&ctl);

        let result = main_loop(&shared, &mut poller, &listener);

        // Wake anyone still blocked, then collect the workers.
        shared.queue_cond.notify_all();
        for worker in workers {
            let _ = worker.join();
        }

        shared.conns.lock().expect("conns mutex poisoned").clear();
        shared.poller.remove(&listener);
        let _ = listener.close();

        result
    }
}

fn main_loop<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    poller: &mut Poller,
    listener: &Arc<Socket>,
) -> Result<()> {
    let mut events = Vec::new();
    let mut direct_worker = if shared.threads == 0 { Some(shared.handler.worker_init()) } else { None };

    let result = loop {
        if !shared.running() {
            break Ok(());
        }
        if let Err(e) = poller.run(&mut events) {
            break Err(e);
        }
        let step = match direct_worker.as_mut() {
            Some(worker) => handle_direct(shared, listener, &events, worker),
            None => handle_queued(shared, listener, &events),
        };
        if let Err(e) = step {
            break Err(e);
        }
    };

    shared.running.store(false, Ordering::SeqCst);

    if let Some(mut worker) = direct_worker.take() {
        drain_direct(shared, &mut worker);
        shared.handler.worker_end(&mut worker);
    } else {
        drain_queued(shared);
    }

    result
}

/* ---- direct mode ---- */

fn handle_direct<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    listener: &Arc<Socket>,
    events: &[SocketEvent],
    worker: &mut H::Worker,
) -> Result<()> {
    let relayed = mem::take(&mut *shared.relay.lock().expect("relay mutex poisoned"));
    for event in relayed {
        match event.kind {
            EventKind::Closed => {
                event.sock.with_state(|s| s.closed = true);
                sock_closed(shared, worker, &event.sock);
            }
            EventKind::Error => sock_error(shared, worker, &event.sock),
            _ => {}
        }
    }

    for event in events {
        let sock = &event.sock;
        if event.events.contains(EventSet::CLOSED) {
            sock.with_state(|s| {
                s.hup = true;
                s.closed = true;
            });
            sock_closed(shared, worker, sock);
        } else if event.events.contains(EventSet::ERROR) {
            sock_error(shared, worker, sock);
        } else {
            if event.events.contains(EventSet::READ) {
                if Arc::ptr_eq(sock, listener) {
                    accept_loop(shared, listener, |client| {
                        sock_accepted(shared, worker, &client);
                    })?;
                    continue;
                }
                sock_can_read(shared, worker, sock);
            }
            if event.events.contains(EventSet::WRITE) {
                sock_can_write(shared, worker, sock);
            }
        }
    }
    Ok(())
}

fn drain_direct<H: StreamHandler>(shared: &Arc<Shared<H>>, worker: &mut H::Worker) {
    let socks: Vec<_> =
        shared.conns.lock().expect("conns mutex poisoned").values().cloned().collect();
    for sock in socks {
        let _ = sock.close();
        sock_closed(shared, worker, &sock);
    }
}

/* ---- queued mode ---- */

fn handle_queued<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    listener: &Arc<Socket>,
    events: &[SocketEvent],
) -> Result<()> {
    let mut accept_pending = false;
    {
        let mut queue = shared.queue.lock().expect("queue mutex poisoned");
        let relayed = mem::take(&mut *shared.relay.lock().expect("relay mutex poisoned"));
        queue.extend(relayed);

        for event in events {
            let sock = &event.sock;
            if event.events.contains(EventSet::CLOSED) {
                sock.with_state(|s| {
                    s.hup = true;
                    s.closed = true;
                });
                queue.push_back(Event { sock: Arc::clone(sock), kind: EventKind::Closed });
                continue;
            }
            if event.events.contains(EventSet::ERROR) {
                queue.push_back(Event { sock: Arc::clone(sock), kind: EventKind::Error });
                continue;
            }
            if event.events.contains(EventSet::READ) {
                if Arc::ptr_eq(sock, listener) {
                    accept_pending = true;
                } else {
                    queue.push_back(Event { sock: Arc::clone(sock), kind: EventKind::Read });
                }
            }
            if event.events.contains(EventSet::WRITE) {
                queue.push_back(Event { sock: Arc::clone(sock), kind: EventKind::Write });
            }
        }
        shared.queue_cond.notify_all();
    }

    if accept_pending {
        accept_loop(shared, listener, |client| {
            shared.requeue(Event { sock: client, kind: EventKind::Accepted });
        })?;
    }
    Ok(())
}

fn worker_run<H: StreamHandler>(shared: &Arc<Shared<H>>) {
    let mut worker = shared.handler.worker_init();

    'running: while shared.running() {
        let event = {
            let mut queue = shared.queue.lock().expect("queue mutex poisoned");
            loop {
                if let Some(event) = queue.pop_front() {
                    break event;
                }
                if !shared.running() {
                    break 'running;
                }
                queue = shared.queue_cond.wait(queue).expect("queue mutex poisoned");
            }
        };
        handle_event(shared, &mut worker, event);
    }

    // Two-phase drain: wait until the main thread has queued the forced
    // close events, then help processing them.
    shared.drain_prepare.count_down();
    shared.drain_run.wait();

    loop {
        let event = shared.queue.lock().expect("queue mutex poisoned").pop_front();
        match event {
            Some(event) => handle_event(shared, &mut worker, event),
            None => break,
        }
    }

    shared.handler.worker_end(&mut worker);
}

fn drain_queued<H: StreamHandler>(shared: &Arc<Shared<H>>) {
    shared.queue_cond.notify_all();
    shared.drain_prepare.wait();

    {
        let conns = shared.conns.lock().expect("conns mutex poisoned");
        let mut queue = shared.queue.lock().expect("queue mutex poisoned");
        queue.clear();
        for sock in conns.values() {
            let _ = sock.close();
            queue.push_back(Event { sock: Arc::clone(sock), kind: EventKind::Closed });
        }
    }

    shared.drain_run.count_down();
}

fn handle_event<H: StreamHandler>(shared: &Arc<Shared<H>>, worker: &mut H::Worker, event: Event) {
    let sock = &event.sock;
    match event.kind {
        EventKind::Accepted => {
            let locked = sock.try_lock_dirs(true, false);
            debug_assert!(locked, "fresh socket cannot be contended");
            sock_accepted(shared, worker, sock);
            sock.unlock_dirs(true, false);
        }

        EventKind::Closed | EventKind::Error => {
            if !sock.try_lock_dirs(true, true) {
                shared.requeue(event);
                return;
            }
            if event.kind == EventKind::Closed {
                sock_closed(shared, worker, sock);
            } else {
                sock_error(shared, worker, sock);
            }
            sock.unlock_dirs(true, true);
        }

        EventKind::Read => {
            if sock.state().closed {
                return;
            }
            // Held read side means another worker is already draining;
            // it will rearm when done.
            if !sock.try_lock_dirs(true, false) {
                return;
            }
            sock_can_read(shared, worker, sock);
            sock.unlock_dirs(true, false);
        }

        EventKind::Write => {
            if sock.state().closed {
                return;
            }
            if !sock.try_lock_dirs(false, true) {
                return;
            }
            sock_can_write(shared, worker, sock);
            sock.unlock_dirs(false, true);
        }
    }
}

/* ---- shared dispatch helpers ---- */

fn accept_loop<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    listener: &Arc<Socket>,
    mut on_accept: impl FnMut(Arc<Socket>),
) -> Result<()> {
    loop {
        match listener.accept() {
            Ok(client) => on_accept(client),
            Err(e) if e.is_again() => {
                shared.poller.rearm(listener)?;
                return Ok(());
            }
            Err(e) => match e.code() {
                // Out of descriptors or memory: drop the connection
                // attempt, keep serving.
                ErrorCode::MaxReached | ErrorCode::Memory => {
                    warn!(%e, "accept");
                    return Ok(());
                }
                ErrorCode::Interrupted
                | ErrorCode::Permission
                | ErrorCode::IoCanceled
                | ErrorCode::IoProtocol => continue,
                _ => return Err(net_error!(ErrorCode::IoUnknown, "accept: {e}")),
            },
        }
    }
}

fn sock_accepted<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    worker: &mut H::Worker,
    sock: &Arc<Socket>,
) {
    if let Err(e) = sock.set_nonblocking(true) {
        warn!(%e, "accepted socket: set nonblocking");
        let _ = sock.close();
        return;
    }

    let hook: Arc<dyn EngineHook> = Arc::clone(shared) as Arc<dyn EngineHook>;
    sock.install_hook(Arc::downgrade(&hook));

    shared.handler.connected(worker, sock);

    // The callback may have closed or broken the socket already.
    if !sock_check(shared, worker, sock, false) {
        return;
    }

    sock.with_state(|s| s.nbl_read = true);
    shared.conns.lock().expect("conns mutex poisoned").insert(sock.fd(), Arc::clone(sock));

    if let Err(e) = shared.poller.add(sock) {
        warn!(%e, "accepted socket: notifier add");
        shared.conns.lock().expect("conns mutex poisoned").remove(&sock.fd());
        let _ = sock.close();
        shared.handler.disconnected(worker, sock);
        sock.set_user_data(None);
    }
}

/// Re-evaluates a socket after callbacks ran. Returns false when the
/// socket was torn down.
fn sock_check<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    worker: &mut H::Worker,
    sock: &Arc<Socket>,
    rearm: bool,
) -> bool {
    loop {
        let state = sock.state();
        if state.err {
            sock_error(shared, worker, sock);
            return false;
        }
        if state.closed {
            sock_closed(shared, worker, sock);
            return false;
        }
        if rearm {
            if let Err(e) = shared.poller.rearm(sock) {
                debug!(%e, "rearm failed, closing");
                let _ = sock.close();
                continue;
            }
        }
        return true;
    }
}

fn sock_can_read<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    worker: &mut H::Worker,
    sock: &Arc<Socket>,
) {
    shared.handler.can_read(worker, sock);
    sock_check(shared, worker, sock, true);
}

fn sock_can_write<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    worker: &mut H::Worker,
    sock: &Arc<Socket>,
) {
    shared.handler.can_write(worker, sock);
    sock_check(shared, worker, sock, true);
}

fn sock_closed<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    worker: &mut H::Worker,
    sock: &Arc<Socket>,
) {
    shared.conns.lock().expect("conns mutex poisoned").remove(&sock.fd());
    shared.poller.remove(sock);
    shared.handler.disconnected(worker, sock);
    // Break the user-data cycle so the handle can drop.
    sock.set_user_data(None);
}

fn sock_error<H: StreamHandler>(
    shared: &Arc<Shared<H>>,
    worker: &mut H::Worker,
    sock: &Arc<Socket>,
) {
    shared.handler.sock_error(worker, sock);
    let _ = sock.close();
    sock_closed(shared, worker, sock);
}
