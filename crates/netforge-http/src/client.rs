//! Blocking HTTP client.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use netforge_core::url::Url;
use netforge_core::{ByteBuf, ByteOrder, ErrorCode, Result, net_error};
use netforge_net::addr::{self, SocketFamily};
use netforge_net::{Socket, TlsClientOpts, WriteOutcome};
use tracing::debug;

use crate::headers::HeaderMap;
use crate::parser::{HttpParser, ParserMode};
use crate::{Method, SERVER_IDENT, Version, header, list_contains, value};

/// Client options, each with its own numeric code on the wire-facing
/// configuration surface.
#[derive(Clone, Debug)]
pub enum ClientOpt {
    NoCertCheck(bool),
    Timeout(Duration),
    RecvTimeout(Duration),
}

impl ClientOpt {
    pub fn code(&self) -> u32 {
        match self {
            Self::NoCertCheck(_) => 1,
            Self::Timeout(_) => 2,
            Self::RecvTimeout(_) => 3,
        }
    }
}

/// A fully received response, decoupled from the connection buffers.
#[derive(Debug)]
pub struct ClientResponse {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// `Authorization` header value for HTTP Basic credentials.
pub fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
}

/// Issues requests over one connection at a time, reconnecting as
/// needed. Plain and TLS, keep-alive aware.
pub struct HttpClient {
    sock: Option<Arc<Socket>>,
    peer: Option<(String, u16, bool)>,
    buf: ByteBuf,
    parser: HttpParser,
    no_cert_check: bool,
    timeout: Option<Duration>,
    recv_timeout: Option<Duration>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            sock: None,
            peer: None,
            buf: ByteBuf::new(ByteOrder::network()),
            parser: HttpParser::new(ParserMode::Response),
            no_cert_check: false,
            timeout: None,
            recv_timeout: None,
        }
    }

    pub fn set_opt(&mut self, opt: ClientOpt) {
        match opt {
            ClientOpt::NoCertCheck(on) => self.no_cert_check = on,
            ClientOpt::Timeout(t) => self.timeout = Some(t),
            ClientOpt::RecvTimeout(t) => self.recv_timeout = Some(t),
        }
    }

    /// Convenience: connect (or reuse), send, read the full response.
    pub fn request(
        &mut self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<ClientResponse> {
        let url = Url::parse(url)?;
        self.connect_url(&url)?;
        self.send_request(method, &url, headers, body)?;
        self.read_response()
    }

    /// Ensures a connection to the URL's host/port, reusing an existing
    /// one when it still matches.
    pub fn connect_url(&mut self, url: &Url) -> Result<()> {
        let wanted = (url.host.clone(), url.port, url.is_tls());
        if self.sock.is_some() && self.peer.as_ref() == Some(&wanted) {
            return Ok(());
        }
        self.close();

        let family = if url.host.parse::<std::net::Ipv6Addr>().is_ok() {
            SocketFamily::Ipv6
        } else if url.host.parse::<std::net::Ipv4Addr>().is_ok() || url.host == "localhost" {
            SocketFamily::Ipv4
        } else {
            addr::sniff_family(&url.host)
        };

        let sock = if url.is_tls() {
            let opts = TlsClientOpts { ca_file: None, no_cert_check: self.no_cert_check };
            Socket::new_tls_client(family, &opts)?
        } else {
            Socket::new_stream(family)?
        };

        if let Some(timeout) = self.timeout {
            sock.set_send_timeout(timeout)?;
            sock.set_recv_timeout(timeout)?;
        }
        if let Some(timeout) = self.recv_timeout {
            sock.set_recv_timeout(timeout)?;
        }

        debug!(host = %url.host, port = url.port, tls = url.is_tls(), "connecting");
        sock.connect(&url.host, url.port)?;
        self.sock = Some(sock);
        self.peer = Some(wanted);
        Ok(())
    }

    /// Serializes and sends one request.
    pub fn send_request(
        &mut self,
        method: Method,
        url: &Url,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<()> {
        let sock = self
            .sock
            .as_ref()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "not connected"))?;

        let mut out = ByteBuf::new(ByteOrder::network());
        let write = |out: &mut ByteBuf| -> std::result::Result<(), ErrorCode> {
            out.put_str(method.as_str())?;
            out.put_u8(b' ')?;
            out.put_str(&url.path)?;
            out.put_u8(b' ')?;
            out.put_str(Version::Http11.as_str())?;
            out.put_str("\r\n")?;

            out.put_str(header::HOST)?;
            out.put_str(": ")?;
            out.put_str(&url.host)?;
            out.put_str("\r\n")?;

            out.put_str(header::USER_AGENT)?;
            out.put_str(": ")?;
            out.put_str(SERVER_IDENT)?;
            out.put_str("\r\n")?;

            for (name, val) in headers {
                out.put_str(name)?;
                out.put_str(": ")?;
                out.put_str(val)?;
                out.put_str("\r\n")?;
            }

            if let Some(body) = body {
                out.put_str(header::CONTENT_LENGTH)?;
                out.put_str(": ")?;
                out.put_str(&body.len().to_string())?;
                out.put_str("\r\n\r\n")?;
                out.put_bytes(body)?;
            } else {
                out.put_str("\r\n")?;
            }
            Ok(())
        };
        write(&mut out)?;

        match sock.write(out.as_slice())? {
            WriteOutcome::Complete(_) => Ok(()),
            WriteOutcome::Again(n) => {
                Err(net_error!(ErrorCode::IoPartial, "short request write: {n}"))
            }
        }
    }

    /// Reads until a complete response is parsed, honoring receive
    /// timeouts and connections that frame the body by closing.
    pub fn read_response(&mut self) -> Result<ClientResponse> {
        self.read_until(|parser| parser.is_complete())?;

        let response = {
            let view = self.parser.response(&self.buf)?;
            ClientResponse {
                version: view.version,
                status: view.status,
                reason: view.reason.to_owned(),
                headers: view.headers.clone(),
                body: view.body.map(<[u8]>::to_vec).unwrap_or_default(),
            }
        };

        // Connection handling for the next request on this client.
        let close = response.version == Version::Http10
            || response
                .headers
                .get(header::CONNECTION)
                .is_some_and(|v| list_contains(v, value::CLOSE));
        if close {
            self.close();
        } else {
            self.parser.reset();
            self.buf.discard_processed();
        }
        Ok(response)
    }

    /// Reads only until the response headers are in. Returns the head
    /// and any already-buffered bytes past it (frames of an upgraded
    /// protocol, typically).
    pub(crate) fn read_response_head(&mut self) -> Result<(ClientResponse, Vec<u8>)> {
        self.read_until(|parser| parser.headers_done())?;

        let head = {
            let view = self.parser.response_head(&self.buf)?;
            ClientResponse {
                version: view.version,
                status: view.status,
                reason: view.reason.to_owned(),
                headers: view.headers.clone(),
                body: Vec::new(),
            }
        };
        let leftover = self.buf.unread().to_vec();
        self.parser.reset();
        self.buf.clear();
        Ok((head, leftover))
    }

    fn read_until(&mut self, done: impl Fn(&HttpParser) -> bool) -> Result<()> {
        let sock = self
            .sock
            .as_ref()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "not connected"))?;

        loop {
            if done(&self.parser) {
                return Ok(());
            }
            self.buf.ensure(512)?;
            match sock.read(self.buf.space_mut()) {
                Ok(n) => {
                    self.buf.add_used(n);
                }
                Err(e) if e.is_again() => {
                    // A blocking socket only reports this on timeout.
                    return Err(net_error!(ErrorCode::IoTimeout, "receive timed out"));
                }
                Err(e) if e.is_closed() => {
                    // EOF ends a read-until-close body.
                    match self.parser.run(&mut self.buf) {
                        netforge_net::RecvStatus::Complete => return Ok(()),
                        _ => return Err(net_error!(ErrorCode::IoClosed, "connection closed")),
                    }
                }
                Err(e) => return Err(e),
            }

            match self.parser.run(&mut self.buf) {
                netforge_net::RecvStatus::Complete | netforge_net::RecvStatus::Again => {}
                netforge_net::RecvStatus::Invalid => {
                    return Err(net_error!(ErrorCode::IoProtocol, "malformed response"));
                }
                netforge_net::RecvStatus::Error | netforge_net::RecvStatus::Closed => {
                    return Err(net_error!(ErrorCode::Generic, "response receive failed"));
                }
            }
        }
    }

    /// Hands the connected socket over, e.g. after a protocol upgrade.
    pub(crate) fn take_socket(&mut self) -> Result<Arc<Socket>> {
        self.peer = None;
        self.sock
            .take()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "not connected"))
    }

    pub fn close(&mut self) {
        if let Some(sock) = self.sock.take() {
            let _ = sock.close();
        }
        self.peer = None;
        self.parser.reset();
        self.buf.clear();
    }
}
