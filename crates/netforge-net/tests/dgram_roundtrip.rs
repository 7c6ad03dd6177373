use std::net::UdpSocket;
use std::sync::mpsc::{Sender, channel};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use netforge_net::{Dgram, DgramControl, DgramHandler, DgramSender, DgramServer, DgramServerOpts};

struct ReverseHandler {
    ready: Mutex<Option<Sender<DgramControl>>>,
}

impl DgramHandler for ReverseHandler {
    type Worker = ();

    fn server_ready(&self, ctl: &DgramControl) {
        if let Some(tx) = self.ready.lock().unwrap().take() {
            let _ = tx.send(ctl.clone());
        }
    }

    fn worker_init(&self) -> Self::Worker {}

    fn recv(&self, _worker: &mut Self::Worker, srv: &DgramSender, dgram: Dgram) {
        let mut bytes = dgram.buf.as_slice().to_vec();
        bytes.reverse();
        srv.send(&bytes, &dgram.src).expect("reply failed");
    }
}

fn reverse_roundtrip(threads: usize) {
    let (tx, rx) = channel();
    let server = thread::spawn(move || {
        let opts = DgramServerOpts {
            host: "127.0.0.1".to_owned(),
            threads,
            ..DgramServerOpts::default()
        };
        DgramServer::run(&opts, ReverseHandler { ready: Mutex::new(Some(tx)) })
            .expect("server run failed");
    });

    let ctl = rx.recv_timeout(Duration::from_secs(5)).expect("server never became ready");
    let addr = ctl.local_addr().unwrap();

    let clients: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
                sock.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
                for round in 0..8 {
                    let msg = format!("dgram {i}/{round}");
                    sock.send_to(msg.as_bytes(), addr).unwrap();
                    let mut buf = [0u8; 1024];
                    let (n, _) = sock.recv_from(&mut buf).unwrap();
                    let mut expected = msg.into_bytes();
                    expected.reverse();
                    assert_eq!(&buf[..n], expected.as_slice());
                }
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }

    ctl.stop().unwrap();
    server.join().unwrap();
}

#[test]
fn reverse_direct_mode() {
    reverse_roundtrip(0);
}

#[test]
fn reverse_with_worker_pool() {
    reverse_roundtrip(2);
}
