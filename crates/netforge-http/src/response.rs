//! HTTP response assembly.

use std::mem;
use std::sync::Arc;
use std::time::SystemTime;

use netforge_core::{ByteBuf, ByteOrder, ErrorCode, Result, net_error};
use netforge_net::{BufEmitter, Emit, EmitStatus, EmitterChain};

use crate::http_date::format_http_date;
use crate::server::HttpConn;
use crate::{SERVER_IDENT, Version, header, status_phrase, value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseMode {
    /// Body is buffered and framed with `Content-Length`.
    Fixed,
    /// Body goes out in `Transfer-Encoding: chunked` frames.
    Chunked,
}

/// What happens to the connection once the response is out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseAction {
    CloseCon,
    KeepCon,
    UpgradeWs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Uninit,
    HeaderOrBody,
    Header,
    Body,
    Completed,
}

/// Builds one response at a time; a worker reuses the same builder for
/// every request it serves.
///
/// Call order: [`begin`](Self::begin), `header`*, `body_*`*,
/// [`end`](Self::end). `end` assembles everything and sends; whatever
/// the socket does not take immediately is parked on the connection and
/// resumed by the next write-ready event.
pub struct ResponseBuilder {
    con: Option<Arc<HttpConn>>,
    version: Version,
    mode: ResponseMode,
    stage: Stage,
    action: ResponseAction,
    action_data: Option<String>,
    buf: ByteBuf,
    body_buf: ByteBuf,
    body_chain: Option<EmitterChain>,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self {
            con: None,
            version: Version::Http11,
            mode: ResponseMode::Fixed,
            stage: Stage::Uninit,
            action: ResponseAction::CloseCon,
            action_data: None,
            buf: ByteBuf::new(ByteOrder::native()),
            body_buf: ByteBuf::new(ByteOrder::native()),
            body_chain: None,
        }
    }

    /// Re-arms the builder for a request on `con`.
    ///
    /// The default connection action follows the protocol: HTTP/1.0
    /// closes, HTTP/1.1 keeps the connection unless the request said
    /// `Connection: close`.
    pub(crate) fn prepare(
        &mut self,
        con: Arc<HttpConn>,
        version: Version,
        connection_header: Option<&str>,
    ) {
        self.con = Some(con);
        self.version = version;
        self.mode = ResponseMode::Fixed;
        self.stage = Stage::Uninit;
        self.buf.clear();
        self.body_buf.clear();
        self.body_chain = None;
        self.action_data = None;
        self.action = match version {
            Version::Http10 => ResponseAction::CloseCon,
            Version::Http11 => {
                if connection_header.is_some_and(|v| v.eq_ignore_ascii_case(value::CLOSE)) {
                    ResponseAction::CloseCon
                } else {
                    ResponseAction::KeepCon
                }
            }
        }
    }

    /// Writes the status line plus the `Server` and `Date` headers; in
    /// chunked mode also `Transfer-Encoding: chunked`.
    pub fn begin(&mut self, mode: ResponseMode, status: u16) -> Result<()> {
        if self.stage != Stage::Uninit {
            return Err(net_error!(ErrorCode::InvalidState, "response already started"));
        }
        self.stage = Stage::HeaderOrBody;
        self.mode = mode;

        self.buf.put_str(self.version.as_str())?;
        self.buf.put_u8(b' ')?;
        self.buf.put_str(&status.to_string())?;
        self.buf.put_u8(b' ')?;
        self.buf.put_str(status_phrase(status))?;
        self.buf.put_str("\r\n")?;

        self.header(header::SERVER, SERVER_IDENT)?;
        self.header(header::DATE, &format_http_date(SystemTime::now()))?;

        if self.mode == ResponseMode::Chunked {
            self.header(header::TRANSFER_ENCODING, value::CHUNKED)?;
        }
        Ok(())
    }

    /// Appends a header line. Fails once body output has started.
    pub fn header(&mut self, name: &str, val: &str) -> Result<()> {
        if self.stage != Stage::HeaderOrBody && self.stage != Stage::Header {
            return Err(net_error!(ErrorCode::InvalidState, "headers already closed"));
        }
        self.stage = Stage::Header;
        self.buf.put_str(name)?;
        self.buf.put_str(": ")?;
        self.buf.put_str(val)?;
        self.buf.put_str("\r\n")?;
        Ok(())
    }

    pub fn body_str(&mut self, body: &str) -> Result<()> {
        self.body_raw(body.as_bytes())
    }

    pub fn body_raw(&mut self, body: &[u8]) -> Result<()> {
        if self.stage == Stage::Uninit || self.stage == Stage::Completed {
            return Err(net_error!(ErrorCode::InvalidState, "response not writable"));
        }
        match self.mode {
            ResponseMode::Fixed => {
                self.body_buf.put_bytes(body)?;
                Ok(())
            }
            ResponseMode::Chunked => {
                if self.stage != Stage::Body {
                    self.close_headers()?;
                    self.stage = Stage::Body;
                }
                self.write_chunk(body)
            }
        }
    }

    /// Attaches an emitter as (part of) the body. Fixed mode only counts
    /// its length into `Content-Length`.
    pub fn body_emitter(&mut self, emitter: Box<dyn Emit>) -> Result<()> {
        if self.body_chain.is_some() {
            return Err(net_error!(ErrorCode::InvalidState, "body emitter already set"));
        }
        let mut chain = EmitterChain::new();
        chain.push(emitter);
        self.body_chain = Some(chain);
        Ok(())
    }

    /// Overrides the post-send action; rejected once the body started.
    pub fn set_action(&mut self, action: ResponseAction, data: Option<String>) -> Result<()> {
        if self.stage >= Stage::Body {
            return Err(net_error!(ErrorCode::InvalidState, "body already started"));
        }
        self.action = action;
        self.action_data = data;
        Ok(())
    }

    pub fn action(&self) -> ResponseAction {
        self.action
    }

    pub fn action_data(&self) -> Option<&str> {
        self.action_data.as_deref()
    }

    pub fn was_started(&self) -> bool {
        self.stage != Stage::Uninit
    }

    pub fn was_sent(&self) -> bool {
        self.stage == Stage::Completed
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Completes the response and hands it to the socket.
    pub fn end(&mut self) -> Result<()> {
        if self.stage == Stage::Uninit || self.stage == Stage::Completed {
            return Err(net_error!(ErrorCode::InvalidState, "response not started"));
        }

        match self.mode {
            ResponseMode::Fixed => {
                let mut len = self.body_buf.used() as u64;
                if let Some(chain) = &self.body_chain {
                    len = len
                        .checked_add(chain.total_len()?)
                        .ok_or_else(|| net_error!(ErrorCode::Overflow, "response length"))?;
                }
                self.header(header::CONTENT_LENGTH, &len.to_string())?;
                self.close_headers()?;
                if self.body_buf.used() > 0 {
                    let body = mem::replace(&mut self.body_buf, ByteBuf::new(ByteOrder::native()));
                    self.buf.put_bytes(body.as_slice())?;
                }
            }
            ResponseMode::Chunked => {
                if self.stage == Stage::HeaderOrBody || self.stage == Stage::Header {
                    self.close_headers()?;
                }
                self.write_chunk(&[])?;
            }
        }

        self.send()
    }

    fn close_headers(&mut self) -> Result<()> {
        match self.action {
            ResponseAction::CloseCon => self.header(header::CONNECTION, value::CLOSE)?,
            ResponseAction::KeepCon => self.header(header::CONNECTION, value::KEEP_ALIVE)?,
            ResponseAction::UpgradeWs => {}
        }
        self.buf.put_str("\r\n")?;
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.buf.put_str(&format!("{:x}", data.len()))?;
        self.buf.put_str("\r\n")?;
        self.buf.put_bytes(data)?;
        self.buf.put_str("\r\n")?;
        Ok(())
    }

    fn send(&mut self) -> Result<()> {
        let con = self
            .con
            .clone()
            .ok_or_else(|| net_error!(ErrorCode::InvalidState, "response has no connection"))?;

        let mut chain = EmitterChain::new();
        let head = mem::replace(&mut self.buf, ByteBuf::new(ByteOrder::native()));
        chain.push(Box::new(BufEmitter::new(head)));
        if let Some(mut body) = self.body_chain.take() {
            chain.append(&mut body);
        }

        match chain.try_write(con.sock()) {
            Ok(EmitStatus::Complete) => {
                self.stage = Stage::Completed;
                Ok(())
            }
            Ok(EmitStatus::Again) => {
                // Park the remainder for the next write-ready event.
                con.set_emitter(chain);
                self.stage = Stage::Completed;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Serialized bytes built so far.
    #[cfg(test)]
    pub(crate) fn raw_buf(&self) -> &[u8] {
        self.buf.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(mode: ResponseMode) -> ResponseBuilder {
        let mut res = ResponseBuilder::new();
        res.begin(mode, 200).unwrap();
        res
    }

    #[test]
    fn begin_writes_status_line_and_standing_headers() {
        let res = started(ResponseMode::Fixed);
        let text = String::from_utf8(res.raw_buf().to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Server: "));
        assert!(text.contains("Date: "));
        assert!(text.ends_with(" GMT\r\n"));
    }

    #[test]
    fn chunked_mode_announces_transfer_encoding() {
        let res = started(ResponseMode::Chunked);
        let text = String::from_utf8(res.raw_buf().to_vec()).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
    }

    #[test]
    fn double_begin_is_rejected() {
        let mut res = started(ResponseMode::Fixed);
        assert!(res.begin(ResponseMode::Fixed, 200).is_err());
    }

    #[test]
    fn header_after_chunked_body_is_rejected() {
        let mut res = started(ResponseMode::Chunked);
        res.body_str("data").unwrap();
        assert!(res.header("Late", "x").is_err());
    }

    #[test]
    fn chunked_body_frames_are_hex_prefixed() {
        let mut res = started(ResponseMode::Chunked);
        res.body_str("Hello World, this is a chunk").unwrap();
        let text = String::from_utf8(res.raw_buf().to_vec()).unwrap();
        assert!(text.contains("1c\r\nHello World, this is a chunk\r\n"));
    }

    #[test]
    fn action_change_after_body_is_rejected() {
        let mut res = started(ResponseMode::Chunked);
        res.body_str("x").unwrap();
        assert!(res.set_action(ResponseAction::CloseCon, None).is_err());
    }
}
