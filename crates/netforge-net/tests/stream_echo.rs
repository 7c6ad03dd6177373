use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use netforge_net::{Socket, StreamControl, StreamHandler, StreamServer, StreamServerOpts};

struct EchoHandler {
    ready: Mutex<Option<Sender<StreamControl>>>,
}

impl StreamHandler for EchoHandler {
    type Worker = ();

    fn server_ready(&self, ctl: &StreamControl) {
        if let Some(tx) = self.ready.lock().unwrap().take() {
            let _ = tx.send(ctl.clone());
        }
    }

    fn worker_init(&self) -> Self::Worker {}

    fn connected(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        sock.enable_auto_readiness();
    }

    fn disconnected(&self, _worker: &mut Self::Worker, _sock: &Arc<Socket>) {}

    fn can_read(&self, _worker: &mut Self::Worker, sock: &Arc<Socket>) {
        let mut chunk = [0u8; 4096];
        loop {
            match sock.read(&mut chunk) {
                Ok(n) => {
                    if sock.write(&chunk[..n]).is_err() {
                        let _ = sock.close();
                        return;
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

    fn can_write(&self, _worker: &mut Self::Worker, _sock: &Arc<Socket>) {}
}

fn start_server(threads: usize) -> (StreamControl, thread::JoinHandle<()>) {
    let (tx, rx) = channel();
    let handle = thread::spawn(move || {
        let opts = StreamServerOpts {
            host: "127.0.0.1".to_owned(),
            threads,
            ..StreamServerOpts::default()
        };
        StreamServer::run(&opts, EchoHandler { ready: Mutex::new(Some(tx)) })
            .expect("server run failed");
    });
    let ctl = rx.recv_timeout(Duration::from_secs(5)).expect("server never became ready");
    (ctl, handle)
}

fn echo_roundtrip(threads: usize) {
    let (ctl, handle) = start_server(threads);
    let addr = ctl.local_addr().unwrap();

    let clients: Vec<_> = (0..8)
        .map(|i| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).expect("connect failed");
                stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
                let msg = format!("hello from client {i}");
                stream.write_all(msg.as_bytes()).unwrap();
                let mut got = vec![0u8; msg.len()];
                stream.read_exact(&mut got).unwrap();
                assert_eq!(got, msg.as_bytes());
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }

    ctl.stop().unwrap();
    handle.join().unwrap();
}

#[test]
fn echo_direct_mode() {
    echo_roundtrip(0);
}

#[test]
fn echo_with_worker_pool() {
    echo_roundtrip(4);
}

#[test]
fn stop_twice_reports_invalid_state() {
    let (ctl, handle) = start_server(0);
    ctl.stop().unwrap();
    handle.join().unwrap();
    assert!(ctl.stop().is_err());
}
