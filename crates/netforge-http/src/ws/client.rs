//! Blocking WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use netforge_core::url::Url;
use netforge_core::{ByteBuf, ByteOrder, ErrorCode, Result, net_error};
use netforge_net::{RecvStatus, Socket, WriteOutcome};
use tracing::debug;

use super::frame;
use super::parser::WsParser;
use super::{WsMessage, WsMsgType, WsMode};
use crate::client::{ClientOpt, HttpClient};
use crate::upgrade::ws_accept_key;
use crate::{Method, header, value};

/// Options accepted by [`WsClient::connect`].
#[derive(Clone, Debug, Default)]
pub struct WsClientOpts {
    pub no_cert_check: bool,
    pub timeout: Option<Duration>,
}

/// A connected client endpoint: masked sends, blocking receives.
pub struct WsClient {
    sock: Arc<Socket>,
    recv: ByteBuf,
    parser: WsParser,
}

impl WsClient {
    /// Performs the HTTP upgrade handshake against `url` (an `http://`
    /// or `https://` URL) and returns the speaking connection.
    pub fn connect(url: &str, opts: &WsClientOpts) -> Result<Self> {
        let url = Url::parse(url)?;

        let mut http = HttpClient::new();
        if opts.no_cert_check {
            http.set_opt(ClientOpt::NoCertCheck(true));
        }
        if let Some(timeout) = opts.timeout {
            http.set_opt(ClientOpt::Timeout(timeout));
        }
        http.connect_url(&url)?;

        let key = BASE64.encode(rand::random::<[u8; 16]>());
        http.send_request(
            Method::Get,
            &url,
            &[
                (header::CONNECTION, value::UPGRADE),
                (header::UPGRADE, value::WEBSOCKET),
                (header::SEC_WEBSOCKET_KEY, &key),
                (header::SEC_WEBSOCKET_VERSION, "13"),
            ],
            None,
        )?;

        let (head, leftover) = http.read_response_head()?;
        if head.status != 101 {
            return Err(net_error!(
                ErrorCode::IoProtocol,
                "upgrade refused: {} {}",
                head.status,
                head.reason
            ));
        }
        let accept = head.headers.get(header::SEC_WEBSOCKET_ACCEPT).unwrap_or_default();
        if accept != ws_accept_key(&key) {
            return Err(net_error!(ErrorCode::IoProtocol, "bad websocket accept key"));
        }

        debug!(host = %url.host, "websocket established");
        let mut recv = ByteBuf::new(ByteOrder::network());
        recv.put_bytes(&leftover)?;
        Ok(Self { sock: http.take_socket()?, recv, parser: WsParser::new(WsMode::Client) })
    }

    /// Sends one message, masked with a fresh key.
    pub fn send(&self, kind: WsMsgType, payload: &[u8]) -> Result<()> {
        let mut out = ByteBuf::new(ByteOrder::network());
        frame::write_frame(&mut out, kind, payload, Some(rand::random::<u32>()))?;
        match self.sock.write(out.as_slice())? {
            WriteOutcome::Complete(_) => Ok(()),
            WriteOutcome::Again(n) => Err(net_error!(ErrorCode::IoPartial, "short send: {n}")),
        }
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(WsMsgType::Text, text.as_bytes())
    }

    /// Blocks until the next complete message arrives.
    pub fn recv(&mut self) -> Result<WsMessage> {
        loop {
            match self.parser.run(&mut self.recv) {
                RecvStatus::Complete => return Ok(self.parser.take_msg()),
                RecvStatus::Again => {}
                RecvStatus::Invalid => {
                    return Err(net_error!(ErrorCode::IoProtocol, "invalid frame"));
                }
                _ => return Err(net_error!(ErrorCode::Generic, "websocket receive failed")),
            }

            self.recv.ensure(512)?;
            match self.sock.read(self.recv.space_mut()) {
                Ok(n) => self.recv.add_used(n),
                Err(e) if e.is_again() => {
                    return Err(net_error!(ErrorCode::IoTimeout, "receive timed out"));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends a close frame and shuts the connection down.
    pub fn close(self) -> Result<()> {
        let _ = self.send(WsMsgType::Close, &[]);
        self.sock.close()
    }
}
