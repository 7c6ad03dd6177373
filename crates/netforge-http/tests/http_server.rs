use std::io::Write;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use netforge_core::Result;
use netforge_http::ws::{WsClient, WsClientOpts, WsMsgType};
use netforge_http::{
    FileRoute, HttpClient, HttpControl, HttpServer, HttpServerHandler, HttpServerOpts, Method,
    Request, ResponseBuilder, ResponseMode, Router, is_ws_upgrade, upgrade_to_ws,
};

struct TestHandler {
    router: Router,
    ready: Mutex<Option<Sender<HttpControl>>>,
}

impl HttpServerHandler for TestHandler {
    fn server_ready(&self, ctl: &HttpControl) {
        if let Some(tx) = self.ready.lock().unwrap().take() {
            let _ = tx.send(ctl.clone());
        }
    }

    fn request(&self, req: &Request<'_>, res: &mut ResponseBuilder) -> Result<()> {
        if is_ws_upgrade(req) {
            return upgrade_to_ws(req, res, None);
        }
        self.router.handle(req, res)
    }

    fn ws_message(&self, msg: netforge_http::ws::WsMessage) {
        // Scenario: TEXT "A" in, TEXT "B" out.
        if msg.kind == WsMsgType::Text {
            let reply: Vec<u8> = msg.payload.iter().map(|b| b + 1).collect();
            if let Some(con) = &msg.con {
                con.send(WsMsgType::Text, &reply).unwrap();
            }
        }
    }
}

fn build_router(file_root: &str) -> Router {
    let mut router = Router::new();
    router.add_fn("/info", |req, res| {
        res.begin(ResponseMode::Chunked, 200)?;
        res.body_str("path=")?;
        res.body_str(req.path)?;
        res.body_str("\n")?;
        for (name, val) in req.params.iter() {
            res.body_str(&format!("{name}={val}\n"))?;
        }
        res.end()
    });
    router.add_fn("/greet", |_req, res| {
        res.begin(ResponseMode::Fixed, 200)?;
        res.header("Content-Type", "text/plain")?;
        res.body_str("hello")?;
        res.end()
    });
    router.add(
        "/files/",
        Box::new(FileRoute::new("/files/", file_root).expect("file root missing")),
    );
    router
}

fn start_server(threads: usize, file_root: &str) -> (HttpControl, thread::JoinHandle<()>, String) {
    let (tx, rx) = channel();
    let handler =
        TestHandler { router: build_router(file_root), ready: Mutex::new(Some(tx)) };
    let server = thread::spawn(move || {
        let opts = HttpServerOpts {
            host: "127.0.0.1".to_owned(),
            threads,
            ..HttpServerOpts::default()
        };
        HttpServer::run(&opts, handler).expect("server run failed");
    });
    let ctl = rx.recv_timeout(Duration::from_secs(5)).expect("server never became ready");
    let addr = ctl.local_addr().unwrap();
    (ctl, server, format!("http://{addr}"))
}

fn file_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut f = std::fs::File::create(dir.path().join("hello.txt")).unwrap();
    f.write_all(b"file contents over http").unwrap();
    dir
}

fn exercise_server(threads: usize) {
    let dir = file_tree();
    let (ctl, server, base) = start_server(threads, dir.path().to_str().unwrap());

    let mut client = HttpClient::new();
    client.set_opt(netforge_http::ClientOpt::RecvTimeout(Duration::from_secs(10)));

    // Fixed response via a routed handler.
    let res = client.request(Method::Get, &format!("{base}/greet"), &[], None).unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"hello");
    assert!(res.headers.get("Server").unwrap().starts_with("netforge/"));
    assert!(res.headers.get("Date").unwrap().ends_with("GMT"));

    // Chunked response including query params; same client connection
    // when keep-alive is in play.
    let res = client
        .request(Method::Get, &format!("{base}/info?a=39&b=12879"), &[], None)
        .unwrap();
    assert_eq!(res.status, 200);
    let text = String::from_utf8(res.body).unwrap();
    assert!(text.contains("path=/info"));
    assert!(text.contains("a=39"));
    assert!(text.contains("b=12879"));

    // Static file serving.
    let res = client.request(Method::Get, &format!("{base}/files/hello.txt"), &[], None).unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"file contents over http");
    assert_eq!(res.headers.get("Content-Type"), Some("text/plain"));

    // Unknown path falls back to the stock 404.
    let res = client.request(Method::Get, &format!("{base}/missing"), &[], None).unwrap();
    assert_eq!(res.status, 404);
    assert_eq!(res.body, b"404 - Not found");

    // Traversal out of the file root is refused.
    let res =
        client.request(Method::Get, &format!("{base}/files/../outside.txt"), &[], None).unwrap();
    assert_eq!(res.status, 404);

    ctl.stop().unwrap();
    server.join().unwrap();
}

#[test]
fn serves_requests_direct_mode() {
    exercise_server(0);
}

#[test]
fn serves_requests_with_worker_pool() {
    exercise_server(4);
}

#[test]
fn websocket_echo_roundtrip() {
    let dir = file_tree();
    let (ctl, server, base) = start_server(2, dir.path().to_str().unwrap());

    let opts = WsClientOpts { timeout: Some(Duration::from_secs(10)), ..WsClientOpts::default() };
    let mut ws = WsClient::connect(&format!("{base}/chat"), &opts).unwrap();

    ws.send_text("A").unwrap();
    let msg = ws.recv().unwrap();
    assert_eq!(msg.kind, WsMsgType::Text);
    assert_eq!(msg.payload, b"B");

    ws.send_text("AAAA").unwrap();
    assert_eq!(ws.recv().unwrap().payload, b"BBBB");

    ws.close().unwrap();
    ctl.stop().unwrap();
    server.join().unwrap();
}
