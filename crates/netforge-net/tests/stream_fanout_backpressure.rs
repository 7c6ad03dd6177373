//! Fan-out under backpressure: every client request triggers a payload
//! broadcast to all connected clients; slow readers force the send
//! buffers through the partial-write / write-ready resume path.

use std::any::Any;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use netforge_net::{
    Socket, SocketCon, StreamControl, StreamHandler, StreamServer, StreamServerOpts,
};

const CLIENTS: usize = 16;
const CHUNK: usize = 512 * 1024;
const EXPECTED_TOTAL: usize = CLIENTS * CHUNK;

struct FanoutInner {
    payload: Vec<u8>,
    conns: Mutex<Vec<Arc<SocketCon>>>,
    connected: AtomicUsize,
    ready: Mutex<Option<Sender<StreamControl>>>,
}

struct FanoutHandler {
    inner: Arc<FanoutInner>,
}

impl FanoutHandler {
    fn broadcast(&self) {
        let conns = self.inner.conns.lock().unwrap();
        for con in conns.iter() {
            let result = con.send_with(|buf| {
                buf.put_bytes(&self.inner.payload)?;
                Ok(())
            });
            if result.is_err() {
                con.close();
            }
        }
    }
}

impl StreamHandler for FanoutHandler {
    type Worker = ();

    fn server_ready(&self, ctl: &StreamControl) {
        if let Some(tx) = self.inner.ready.lock().unwrap().take() {
            let _ = tx.send(ctl.clone());
        }
    }

    fn worker_init(&self) -> Self::Worker {}

    fn connected(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        sock.enable_auto_readiness();
        let con = Arc::new(SocketCon::new(Arc::clone(sock)));
        sock.set_user_data(Some(Arc::clone(&con) as Arc<dyn Any + Send + Sync>));
        self.inner.conns.lock().unwrap().push(con);
        self.inner.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnected(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        let mut conns = self.inner.conns.lock().unwrap();
        conns.retain(|con| !Arc::ptr_eq(con.sock(), sock));
    }

    fn can_read(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        let mut chunk = [0u8; 256];
        loop {
            match sock.read(&mut chunk) {
                Ok(n) => {
                    for _ in chunk[..n].iter().filter(|&&b| b == b'\n') {
                        self.broadcast();
                    }
                }
                Err(e) if e.is_again() => return,
                Err(_) => {
                    let _ = sock.close();
                    return;
                }
            }
        }
    }

    fn can_write(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        let Some(data) = sock.user_data() else { return };
        let Ok(con) = data.downcast::<SocketCon>() else { return };
        match con.flush() {
            Ok(()) => {}
            Err(e) if e.is_again() => {}
            Err(_) => con.close(),
        }
    }
}

fn fanout_run(threads: usize) {
    let inner = Arc::new(FanoutInner {
        payload: vec![0x42; CHUNK],
        conns: Mutex::new(Vec::new()),
        connected: AtomicUsize::new(0),
        ready: Mutex::new(None),
    });

    let (tx, rx) = channel();
    *inner.ready.lock().unwrap() = Some(tx);

    let server_inner = Arc::clone(&inner);
    let server = thread::spawn(move || {
        let opts = StreamServerOpts {
            host: "127.0.0.1".to_owned(),
            threads,
            max_events: 32,
            ..StreamServerOpts::default()
        };
        StreamServer::run(&opts, FanoutHandler { inner: server_inner }).expect("server run failed");
    });

    let ctl = rx.recv_timeout(Duration::from_secs(5)).expect("server never became ready");
    let addr = ctl.local_addr().unwrap();

    let streams: Vec<_> = (0..CLIENTS).map(|_| TcpStream::connect(addr).unwrap()).collect();

    // Broadcasts only reach already-registered connections; wait for all.
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while inner.connected.load(Ordering::SeqCst) < CLIENTS {
        assert!(std::time::Instant::now() < deadline, "not all clients registered");
        thread::sleep(Duration::from_millis(5));
    }

    let readers: Vec<_> = streams
        .into_iter()
        .map(|mut stream| {
            thread::spawn(move || {
                stream.set_read_timeout(Some(Duration::from_secs(30))).unwrap();
                stream.write_all(b"go\n").unwrap();
                let mut received = 0usize;
                let mut chunk = vec![0u8; 64 * 1024];
                while received < EXPECTED_TOTAL {
                    let n = stream.read(&mut chunk).expect("read failed");
                    assert!(n > 0, "connection closed early at {received} bytes");
                    assert!(chunk[..n].iter().all(|&b| b == 0x42));
                    received += n;
                }
                assert_eq!(received, EXPECTED_TOTAL);
            })
        })
        .collect();

    for reader in readers {
        reader.join().unwrap();
    }

    ctl.stop().unwrap();
    server.join().unwrap();
}

#[test]
fn fanout_direct_mode() {
    fanout_run(0);
}

#[test]
fn fanout_with_worker_pool() {
    fanout_run(4);
}
