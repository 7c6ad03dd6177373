//! NM stream server/client exchange, mirroring the transform-and-echo
//! style of the protocol's reference scenarios.

use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use netforge_net::addr::SocketFamily;
use netforge_nm::{
    NmControl, NmMessage, NmStreamClient, NmStreamClientOpts, NmStreamCon, NmStreamHandler,
    NmStreamServer, NmStreamServerOpts,
};

fn request_msg() -> NmMessage {
    let mut msg = NmMessage::new();
    msg.set_i8("INT8", -7);
    msg.set_u8("UINT8", 7);
    msg.set_i16("INT16", -15);
    msg.set_u16("UINT16", 15);
    msg.set_i32("INT32", -31);
    msg.set_u32("UINT32", 31);
    msg.set_i64("INT64", -63);
    msg.set_u64("UINT64", 63);
    msg.set_bool("BOOL", true);
    msg.set_char("CHAR", 63);
    msg.set_schar("SCHAR", -126);
    msg.set_uchar("UCHAR", 254);
    msg.set_f32("FLOAT", 1.23456);
    msg.set_f64("DOUBLE", 1.234_567_8);
    msg.set_str("STR", "Hello");
    msg.set_blob("BLOB", vec![b'T']);
    msg
}

/// The response the server builds from a valid request.
fn transform(msg: &NmMessage) -> NmMessage {
    let mut out = NmMessage::new();
    out.set_i8("INT8", msg.get_i8("INT8").unwrap() - 1);
    out.set_u8("UINT8", msg.get_u8("UINT8").unwrap() + 1);
    out.set_u64("UINT64", msg.get_u64("UINT64").unwrap() + 1);
    out.set_bool("BOOL", !msg.get_bool("BOOL").unwrap());
    out.set_str("STR", msg.get_str("STR").unwrap().chars().rev().collect::<String>());
    out.set_blob("BLOB", vec![b'Z']);
    out
}

struct EchoHandler {
    ready: Mutex<Option<Sender<NmControl>>>,
}

impl NmStreamHandler for EchoHandler {
    fn server_ready(&self, ctl: &NmControl) {
        if let Some(tx) = self.ready.lock().unwrap().take() {
            let _ = tx.send(ctl.clone());
        }
    }

    fn client_msg(&self, con: &Arc<NmStreamCon>, msg: NmMessage) {
        con.send(&transform(&msg)).unwrap();
    }
}

fn start_server(threads: usize) -> (NmControl, thread::JoinHandle<()>) {
    let (tx, rx) = channel();
    let server = thread::spawn(move || {
        let opts = NmStreamServerOpts {
            host: "127.0.0.1".to_owned(),
            threads,
            ..NmStreamServerOpts::default()
        };
        NmStreamServer::run(&opts, EchoHandler { ready: Mutex::new(Some(tx)) })
            .expect("server run failed");
    });
    let ctl = rx.recv_timeout(Duration::from_secs(5)).expect("server never became ready");
    (ctl, server)
}

fn exchange_once(addr: std::net::SocketAddr) {
    let mut client = NmStreamClient::new();
    client.set_recv_timeout(Duration::from_secs(10));
    client
        .connect(&NmStreamClientOpts {
            host: addr.ip().to_string(),
            port: addr.port(),
            family: SocketFamily::Ipv4,
            tls: None,
        })
        .unwrap();

    for _ in 0..4 {
        client.send(&request_msg()).unwrap();
        let reply = client.recv().unwrap();
        assert_eq!(reply.get_i8("INT8"), Some(-8));
        assert_eq!(reply.get_u8("UINT8"), Some(8));
        assert_eq!(reply.get_u64("UINT64"), Some(64));
        assert_eq!(reply.get_bool("BOOL"), Some(false));
        assert_eq!(reply.get_str("STR"), Some("olleH"));
        assert_eq!(reply.get_blob("BLOB"), Some(&[b'Z'][..]));
    }
    client.close().unwrap();
}

#[test]
fn stream_exchange_direct_mode() {
    let (ctl, server) = start_server(0);
    exchange_once(ctl.local_addr().unwrap());
    ctl.stop().unwrap();
    server.join().unwrap();
}

#[test]
fn stream_exchange_multithreaded() {
    let (ctl, server) = start_server(4);
    let addr = ctl.local_addr().unwrap();

    let clients: Vec<_> = (0..8).map(|_| thread::spawn(move || exchange_once(addr))).collect();
    for client in clients {
        client.join().unwrap();
    }

    ctl.stop().unwrap();
    server.join().unwrap();
}
