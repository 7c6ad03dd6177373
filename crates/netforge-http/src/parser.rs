//! Byte-at-a-time HTTP/1.x message parser.
//!
//! The parser consumes the receive buffer through its read cursor and
//! records the interesting pieces as spans into that buffer, so bodies
//! are never copied (chunked bodies are compacted in place to stay
//! contiguous). The buffer must not be compacted while a parsed message
//! is still being read; [`HttpParser::reset`] ends that window.

use std::ops::Range;

use indexmap::IndexMap;
use netforge_core::{ByteBuf, ErrorCode, Result, net_error};
use netforge_net::RecvStatus;

use crate::headers::HeaderMap;
use crate::{DEF_MAX_BODY_SIZE, DEF_MAX_HEADER_SIZE, Method, Version, list_contains};
use crate::{header, value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParserMode {
    Request,
    Response,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum State {
    Begin,
    ReqMethod,
    ReqPath,
    ReqParamBegin,
    ReqParamName,
    ReqParamValue,
    ReqLineLf,
    ResStatusCode,
    ResStatusMsgCr,
    ResStatusMsgLf,
    VersionH,
    VersionHt,
    VersionHtt,
    VersionHttp,
    VersionSlash,
    VersionMajor,
    VersionMinor,
    HeaderLineBegin,
    HeaderName,
    HeaderValue,
    HeaderLineLf,
    HeadersEndLf,
    BodyReadAll,
    BodyFixed,
    BodyChunkSize,
    BodyChunkSizeLf,
    BodyChunkContent,
    BodyChunkEndLf,
    Complete,
}

/// A parsed request, borrowed from the parser and its receive buffer.
pub struct Request<'b> {
    pub method: Method,
    pub version: Version,
    pub path: &'b str,
    pub params: &'b IndexMap<String, String>,
    pub headers: &'b HeaderMap,
    pub body: Option<&'b [u8]>,
}

/// A parsed response, borrowed from the parser and its receive buffer.
pub struct ResponseView<'b> {
    pub version: Version,
    pub status: u16,
    pub reason: &'b str,
    pub headers: &'b HeaderMap,
    pub body: Option<&'b [u8]>,
}

pub struct HttpParser {
    mode: ParserMode,
    pub max_header_size: usize,
    pub max_body_size: usize,

    state: State,
    prev_state: State,
    state_chars: usize,

    method: Option<Method>,
    version: Option<Version>,
    version_major: u32,
    version_minor: u32,
    path: Range<usize>,
    params: IndexMap<String, String>,
    status_code: u16,
    status_msg: Range<usize>,
    headers: HeaderMap,
    body_begin: usize,
    body_len: usize,

    msg_begin: usize,
    token_begin: usize,
    status_msg_begin: usize,
    param_name: Option<Range<usize>>,
    header_name: Range<usize>,
    header_name_begin: usize,
    header_value_begin: usize,

    chunk_dst: usize,
    chunk_begin: usize,
    chunk_size: usize,
}

impl HttpParser {
    pub fn new(mode: ParserMode) -> Self {
        let mut parser = Self {
            mode,
            max_header_size: DEF_MAX_HEADER_SIZE,
            max_body_size: DEF_MAX_BODY_SIZE,
            state: State::Begin,
            prev_state: State::Begin,
            state_chars: 0,
            method: None,
            version: None,
            version_major: 0,
            version_minor: 0,
            path: 0..0,
            params: IndexMap::new(),
            status_code: 0,
            status_msg: 0..0,
            headers: HeaderMap::new(),
            body_begin: 0,
            body_len: 0,
            msg_begin: 0,
            token_begin: 0,
            status_msg_begin: 0,
            param_name: None,
            header_name: 0..0,
            header_name_begin: 0,
            header_value_begin: 0,
            chunk_dst: 0,
            chunk_begin: 0,
            chunk_size: 0,
        };
        parser.reset();
        parser
    }

    /// Re-arms for the next message. Any previously returned views are
    /// invalid afterwards.
    pub fn reset(&mut self) {
        self.state = State::Begin;
        self.prev_state = State::Begin;
        self.state_chars = 0;
        self.method = None;
        self.version = None;
        self.version_major = 0;
        self.version_minor = 0;
        self.path = 0..0;
        self.params.clear();
        self.status_code = 0;
        self.status_msg = 0..0;
        self.headers.clear();
        self.body_begin = 0;
        self.body_len = 0;
        self.msg_begin = 0;
        self.token_begin = 0;
        self.status_msg_begin = 0;
        self.param_name = None;
        self.header_name = 0..0;
        self.header_name_begin = 0;
        self.header_value_begin = 0;
        self.chunk_dst = 0;
        self.chunk_begin = 0;
        self.chunk_size = 0;
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Feeds the parser from the buffer's read cursor.
    ///
    /// In response mode without body framing headers, the body runs
    /// until the peer closes; the caller signals that by invoking `run`
    /// once more with no new bytes available.
    pub fn run(&mut self, buf: &mut ByteBuf) -> RecvStatus {
        if buf.avail() == 0 {
            if self.state == State::BodyReadAll {
                self.body_len = buf.used() - self.body_begin;
                self.state = State::Complete;
                return RecvStatus::Complete;
            }
            return RecvStatus::Again;
        }

        while buf.avail() > 0 {
            // Size limits, checked against consumed offsets.
            if self.state < State::BodyReadAll
                && buf.read_pos() - self.msg_begin > self.max_header_size
            {
                return RecvStatus::Invalid;
            }
            if self.state >= State::BodyReadAll && self.state < State::Complete {
                let body_bytes = buf.read_pos().saturating_sub(self.body_begin);
                if body_bytes > self.max_body_size {
                    return RecvStatus::Invalid;
                }
            }

            let c = buf.get_u8().expect("availability checked");

            // Re-evaluate the same byte until a state consumes it.
            loop {
                if self.state != self.prev_state {
                    self.prev_state = self.state;
                    self.state_chars = 0;
                }
                self.state_chars += 1;

                match self.step(c, buf) {
                    Step::Consume => break,
                    Step::Reeval => {}
                    Step::Done(status) => return status,
                }
            }
        }

        if self.state == State::BodyReadAll {
            // Everything so far belongs to the body.
            if buf.read_pos() - self.body_begin > self.max_body_size {
                return RecvStatus::Invalid;
            }
        }
        RecvStatus::Again
    }

    fn step(&mut self, c: u8, buf: &mut ByteBuf) -> Step {
        let pos = buf.read_pos();
        match self.state {
            State::Begin => {
                self.msg_begin = pos - 1;
                self.token_begin = pos - 1;
                self.state = match self.mode {
                    ParserMode::Request => State::ReqMethod,
                    ParserMode::Response => State::VersionH,
                };
                Step::Reeval
            }

            State::ReqMethod => {
                if c != b' ' {
                    return Step::Consume;
                }
                match Method::from_bytes(&buf.as_slice()[self.token_begin..pos - 1]) {
                    Ok(method) => self.method = Some(method),
                    Err(_) => return Step::Done(RecvStatus::Invalid),
                }
                self.state = State::ReqPath;
                Step::Consume
            }

            State::ReqPath => {
                match c {
                    b' ' => self.state = State::VersionH,
                    b'?' => self.state = State::ReqParamBegin,
                    _ => return Step::Consume,
                }
                self.path = pos - self.state_chars..pos - 1;
                Step::Consume
            }

            State::ReqParamBegin => {
                self.param_name = None;
                self.state = State::ReqParamName;
                Step::Reeval
            }

            State::ReqParamName => {
                match c {
                    b' ' => self.state = State::VersionH,
                    b'&' => self.state = State::ReqParamBegin,
                    b'=' => {
                        if self.state_chars > 1 {
                            self.param_name = Some(pos - self.state_chars..pos - 1);
                        }
                        self.state = State::ReqParamValue;
                    }
                    _ => {}
                }
                Step::Consume
            }

            State::ReqParamValue => {
                match c {
                    b' ' => self.state = State::VersionH,
                    b'&' => self.state = State::ReqParamBegin,
                    _ => return Step::Consume,
                }
                // Pairs with an empty name are skipped.
                if let Some(name) = self.param_name.take() {
                    let value = pos - self.state_chars..pos - 1;
                    let name = String::from_utf8_lossy(&buf.as_slice()[name]).into_owned();
                    let value = String::from_utf8_lossy(&buf.as_slice()[value]).into_owned();
                    self.params.insert(name, value);
                }
                Step::Consume
            }

            State::ReqLineLf => {
                if c != b'\n' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::HeaderLineBegin;
                Step::Consume
            }

            State::ResStatusCode => {
                if self.state_chars <= 3 {
                    if !c.is_ascii_digit() {
                        return Step::Done(RecvStatus::Invalid);
                    }
                    self.status_code = self.status_code * 10 + u16::from(c - b'0');
                    return Step::Consume;
                }
                if c != b' ' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.status_msg_begin = pos;
                self.state = State::ResStatusMsgCr;
                Step::Consume
            }

            State::ResStatusMsgCr => {
                if c != b'\r' {
                    return Step::Consume;
                }
                self.status_msg = self.status_msg_begin..pos - 1;
                self.state = State::ResStatusMsgLf;
                Step::Consume
            }

            State::ResStatusMsgLf => {
                if c != b'\n' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::HeaderLineBegin;
                Step::Consume
            }

            State::VersionH => {
                if c != b'H' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::VersionHt;
                Step::Consume
            }

            State::VersionHt => {
                if c != b'T' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::VersionHtt;
                Step::Consume
            }

            State::VersionHtt => {
                if c != b'T' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::VersionHttp;
                Step::Consume
            }

            State::VersionHttp => {
                if c != b'P' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::VersionSlash;
                Step::Consume
            }

            State::VersionSlash => {
                if c != b'/' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::VersionMajor;
                Step::Consume
            }

            State::VersionMajor => {
                if c.is_ascii_digit() {
                    self.version_major = self.version_major * 10 + u32::from(c - b'0');
                    return Step::Consume;
                }
                if c != b'.' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::VersionMinor;
                Step::Consume
            }

            State::VersionMinor => {
                if c.is_ascii_digit() {
                    self.version_minor = self.version_minor * 10 + u32::from(c - b'0');
                    return Step::Consume;
                }
                match self.mode {
                    ParserMode::Request => {
                        if c != b'\r' {
                            return Step::Done(RecvStatus::Invalid);
                        }
                        self.state = State::ReqLineLf;
                    }
                    ParserMode::Response => {
                        if c != b' ' {
                            return Step::Done(RecvStatus::Invalid);
                        }
                        self.state = State::ResStatusCode;
                    }
                }
                match Version::from_digits(self.version_major, self.version_minor) {
                    Ok(version) => self.version = Some(version),
                    Err(_) => return Step::Done(RecvStatus::Invalid),
                }
                Step::Consume
            }

            State::HeaderLineBegin => {
                self.header_name_begin = pos - 1;
                self.header_value_begin = 0;
                self.state = State::HeaderName;
                Step::Reeval
            }

            State::HeaderName => {
                match c {
                    b'\r' => {
                        if self.state_chars == 1 {
                            self.state = State::HeadersEndLf;
                            return Step::Consume;
                        }
                        return Step::Done(RecvStatus::Invalid);
                    }
                    b' ' | b'\n' => return Step::Done(RecvStatus::Invalid),
                    b':' => {}
                    _ => return Step::Consume,
                }
                self.header_name = self.header_name_begin..pos - 1;
                self.state = State::HeaderValue;
                Step::Consume
            }

            State::HeaderValue => {
                if (c == b' ' || c == b'\t') && self.header_value_begin == 0 {
                    return Step::Consume;
                }
                match c {
                    b'\r' => {
                        if self.header_value_begin == 0 {
                            return Step::Done(RecvStatus::Invalid);
                        }
                    }
                    b'\n' => return Step::Done(RecvStatus::Invalid),
                    _ => {
                        if self.header_value_begin == 0 {
                            self.header_value_begin = pos - 1;
                        }
                        return Step::Consume;
                    }
                }
                // Trim trailing whitespace from the value.
                let mut end = pos - 1;
                while end > self.header_value_begin
                    && matches!(buf.as_slice()[end - 1], b' ' | b'\t')
                {
                    end -= 1;
                }
                self.save_header(buf, end);
                self.state = State::HeaderLineLf;
                Step::Consume
            }

            State::HeaderLineLf => {
                if c != b'\n' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::HeaderLineBegin;
                Step::Consume
            }

            State::HeadersEndLf => {
                if c != b'\n' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.body_begin = pos;
                self.begin_body()
            }

            State::BodyReadAll => {
                buf.mark_all_processed();
                Step::Consume
            }

            State::BodyFixed => {
                if self.state_chars < self.body_len {
                    return Step::Consume;
                }
                self.state = State::Complete;
                Step::Done(RecvStatus::Complete)
            }

            State::BodyChunkSize => {
                if c == b'\r' {
                    self.state = State::BodyChunkSizeLf;
                    return Step::Consume;
                }
                let digit = match c {
                    b'0'..=b'9' => c - b'0',
                    b'A'..=b'F' => c - b'A' + 10,
                    b'a'..=b'f' => c - b'a' + 10,
                    _ => return Step::Done(RecvStatus::Invalid),
                };
                self.chunk_size = (self.chunk_size << 4) + digit as usize;
                Step::Consume
            }

            State::BodyChunkSizeLf => {
                if c != b'\n' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.chunk_begin = pos;
                self.state = State::BodyChunkContent;
                Step::Consume
            }

            State::BodyChunkContent => {
                if self.state_chars <= self.chunk_size {
                    return Step::Consume;
                }
                if c != b'\r' {
                    return Step::Done(RecvStatus::Invalid);
                }
                self.state = State::BodyChunkEndLf;
                Step::Consume
            }

            State::BodyChunkEndLf => {
                if c != b'\n' {
                    return Step::Done(RecvStatus::Invalid);
                }
                if self.chunk_size == 0 {
                    self.state = State::Complete;
                    return Step::Done(RecvStatus::Complete);
                }
                // Compact the chunk payload down so the body stays
                // contiguous starting at body_begin.
                buf.copy_within(self.chunk_begin, self.chunk_dst, self.chunk_size);
                self.chunk_dst += self.chunk_size;
                self.body_len += self.chunk_size;
                self.chunk_size = 0;
                self.state = State::BodyChunkSize;
                Step::Consume
            }

            State::Complete => Step::Done(RecvStatus::Complete),
        }
    }

    /// Decides body framing after the blank line.
    fn begin_body(&mut self) -> Step {
        let chunked = self
            .headers
            .get(header::TRANSFER_ENCODING)
            .is_some_and(|te| list_contains(te, value::CHUNKED));
        if chunked {
            self.chunk_dst = self.body_begin;
            self.chunk_size = 0;
            self.state = State::BodyChunkSize;
            return Step::Consume;
        }

        let content_length =
            self.headers.get(header::CONTENT_LENGTH).map(|len| len.trim().parse::<u64>());
        if let Some(parsed) = content_length {
            let Ok(len) = parsed else {
                return Step::Done(RecvStatus::Invalid);
            };
            if len == 0 {
                self.state = State::Complete;
                return Step::Done(RecvStatus::Complete);
            }
            let Ok(len) = usize::try_from(len) else {
                return Step::Done(RecvStatus::Invalid);
            };
            self.body_len = len;
            self.state = State::BodyFixed;
            return Step::Consume;
        }

        match self.mode {
            ParserMode::Request => {
                self.state = State::Complete;
                Step::Done(RecvStatus::Complete)
            }
            ParserMode::Response => {
                self.state = State::BodyReadAll;
                Step::Consume
            }
        }
    }

    fn save_header(&mut self, buf: &ByteBuf, value_end: usize) {
        let name = String::from_utf8_lossy(&buf.as_slice()[self.header_name.clone()]).into_owned();
        let val =
            String::from_utf8_lossy(&buf.as_slice()[self.header_value_begin..value_end]).into_owned();
        self.headers.append(&name, &val);
    }

    fn body_span(&self) -> Option<Range<usize>> {
        if self.body_len == 0 {
            return None;
        }
        Some(self.body_begin..self.body_begin + self.body_len)
    }

    /// The parsed request. Valid until [`reset`](Self::reset).
    pub fn request<'b>(&'b self, buf: &'b ByteBuf) -> Result<Request<'b>> {
        if self.state != State::Complete || self.mode != ParserMode::Request {
            return Err(net_error!(ErrorCode::InvalidState, "no complete request"));
        }
        let path = std::str::from_utf8(&buf.as_slice()[self.path.clone()])
            .map_err(|_| net_error!(ErrorCode::InvalidArg, "path not utf-8"))?;
        Ok(Request {
            method: self.method.expect("method set on complete request"),
            version: self.version.expect("version set on complete request"),
            path,
            params: &self.params,
            headers: &self.headers,
            body: self.body_span().map(|span| &buf.as_slice()[span]),
        })
    }

    /// Status line and headers have been fully parsed.
    pub fn headers_done(&self) -> bool {
        self.state >= State::BodyReadAll
    }

    /// The response's status line and headers, available as soon as the
    /// header section ended. Needed for upgrade handshakes, where the
    /// `101` response has no body and the connection changes protocol.
    pub fn response_head<'b>(&'b self, buf: &'b ByteBuf) -> Result<ResponseView<'b>> {
        if self.mode != ParserMode::Response || !self.headers_done() {
            return Err(net_error!(ErrorCode::InvalidState, "response headers incomplete"));
        }
        let reason = std::str::from_utf8(&buf.as_slice()[self.status_msg.clone()])
            .map_err(|_| net_error!(ErrorCode::InvalidArg, "reason not utf-8"))?;
        Ok(ResponseView {
            version: self.version.expect("version set once headers are done"),
            status: self.status_code,
            reason,
            headers: &self.headers,
            body: None,
        })
    }

    /// The parsed response. Valid until [`reset`](Self::reset).
    pub fn response<'b>(&'b self, buf: &'b ByteBuf) -> Result<ResponseView<'b>> {
        if self.state != State::Complete || self.mode != ParserMode::Response {
            return Err(net_error!(ErrorCode::InvalidState, "no complete response"));
        }
        let reason = std::str::from_utf8(&buf.as_slice()[self.status_msg.clone()])
            .map_err(|_| net_error!(ErrorCode::InvalidArg, "reason not utf-8"))?;
        Ok(ResponseView {
            version: self.version.expect("version set on complete response"),
            status: self.status_code,
            reason,
            headers: &self.headers,
            body: self.body_span().map(|span| &buf.as_slice()[span]),
        })
    }
}

enum Step {
    /// The byte was consumed; fetch the next one.
    Consume,
    /// State changed; evaluate the same byte again.
    Reeval,
    Done(RecvStatus),
}

#[cfg(test)]
mod tests {
    use netforge_core::ByteOrder;

    use super::*;

    fn feed(parser: &mut HttpParser, input: &[u8]) -> (RecvStatus, ByteBuf) {
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(input).unwrap();
        let status = parser.run(&mut buf);
        (status, buf)
    }

    #[test]
    fn parses_simple_get() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, buf) = feed(&mut parser, b"GET /info HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(status, RecvStatus::Complete);

        let req = parser.request(&buf).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.version, Version::Http11);
        assert_eq!(req.path, "/info");
        assert_eq!(req.headers.get("Host"), Some("h"));
        assert_eq!(req.headers.len(), 1);
        assert!(req.body.is_none());
    }

    #[test]
    fn parses_query_params() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, buf) = feed(&mut parser, b"GET /p?a=39&b=12879 HTTP/1.0\r\n\r\n");
        assert_eq!(status, RecvStatus::Complete);

        let req = parser.request(&buf).unwrap();
        assert_eq!(req.version, Version::Http10);
        assert_eq!(req.path, "/p");
        assert_eq!(req.params.get("a").map(String::as_str), Some("39"));
        assert_eq!(req.params.get("b").map(String::as_str), Some("12879"));
        assert_eq!(req.params.len(), 2);
    }

    #[test]
    fn empty_param_names_are_skipped() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, buf) = feed(&mut parser, b"GET /p?=x&k=v HTTP/1.1\r\n\r\n");
        assert_eq!(status, RecvStatus::Complete);
        let req = parser.request(&buf).unwrap();
        assert_eq!(req.params.len(), 1);
        assert_eq!(req.params.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn parses_chunked_body_contiguously() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, buf) = feed(
            &mut parser,
            b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n",
        );
        assert_eq!(status, RecvStatus::Complete);

        let req = parser.request(&buf).unwrap();
        let body = req.body.unwrap();
        assert_eq!(body, b"Hello World");
        assert_eq!(body.len(), 11);
    }

    #[test]
    fn parses_fixed_length_body() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, buf) =
            feed(&mut parser, b"POST /u HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd");
        assert_eq!(status, RecvStatus::Complete);
        let req = parser.request(&buf).unwrap();
        assert_eq!(req.body.unwrap(), b"abcd");
    }

    #[test]
    fn body_stays_inside_receive_buffer() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, buf) =
            feed(&mut parser, b"POST /u HTTP/1.1\r\nContent-Length: 3\r\n\r\nxyz");
        assert_eq!(status, RecvStatus::Complete);
        let req = parser.request(&buf).unwrap();
        let body = req.body.unwrap();
        let base = buf.as_slice().as_ptr() as usize;
        let body_ptr = body.as_ptr() as usize;
        assert!(body_ptr >= base && body_ptr + body.len() <= base + buf.used());
    }

    #[test]
    fn incremental_input_resumes() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let mut buf = ByteBuf::new(ByteOrder::network());

        for chunk in [&b"GET /a"[..], b"b HTTP/1.", b"1\r\nHost:", b" x\r\n"] {
            buf.put_bytes(chunk).unwrap();
            assert_eq!(parser.run(&mut buf), RecvStatus::Again);
        }
        buf.put_bytes(b"\r\n").unwrap();
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);

        let req = parser.request(&buf).unwrap();
        assert_eq!(req.path, "/ab");
        assert_eq!(req.headers.get("host"), Some("x"));
    }

    #[test]
    fn duplicate_headers_merge() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, buf) =
            feed(&mut parser, b"GET / HTTP/1.1\r\nX-Tag: one\r\nx-tag: two\r\n\r\n");
        assert_eq!(status, RecvStatus::Complete);
        let req = parser.request(&buf).unwrap();
        assert_eq!(req.headers.get("X-Tag"), Some("one, two"));
    }

    #[test]
    fn header_value_whitespace_is_trimmed() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, buf) = feed(&mut parser, b"GET / HTTP/1.1\r\nPad:   spaced out  \r\n\r\n");
        assert_eq!(status, RecvStatus::Complete);
        let req = parser.request(&buf).unwrap();
        assert_eq!(req.headers.get("Pad"), Some("spaced out"));
    }

    #[test]
    fn space_in_header_name_is_invalid() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, _) = feed(&mut parser, b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n");
        assert_eq!(status, RecvStatus::Invalid);
    }

    #[test]
    fn unknown_method_is_invalid() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, _) = feed(&mut parser, b"BREW /pot HTTP/1.1\r\n\r\n");
        assert_eq!(status, RecvStatus::Invalid);
    }

    #[test]
    fn unsupported_version_is_invalid() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let (status, _) = feed(&mut parser, b"GET / HTTP/2.0\r\n\r\n");
        assert_eq!(status, RecvStatus::Invalid);
    }

    #[test]
    fn header_limit_is_enforced() {
        let mut parser = HttpParser::new(ParserMode::Request);
        parser.max_header_size = 64;
        let mut input = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        input.extend(std::iter::repeat_n(b'a', 128));
        input.extend_from_slice(b"\r\n\r\n");
        let (status, _) = feed(&mut parser, &input);
        assert_eq!(status, RecvStatus::Invalid);
    }

    #[test]
    fn body_limit_is_enforced() {
        let mut parser = HttpParser::new(ParserMode::Request);
        parser.max_body_size = 8;
        let mut input = b"POST / HTTP/1.1\r\nContent-Length: 32\r\n\r\n".to_vec();
        input.extend(std::iter::repeat_n(b'b', 32));
        let (status, _) = feed(&mut parser, &input);
        assert_eq!(status, RecvStatus::Invalid);
    }

    #[test]
    fn parses_response_with_fixed_body() {
        let mut parser = HttpParser::new(ParserMode::Response);
        let (status, buf) = feed(
            &mut parser,
            b"HTTP/1.1 404 Not found\r\nContent-Length: 5\r\n\r\nsorry",
        );
        assert_eq!(status, RecvStatus::Complete);
        let res = parser.response(&buf).unwrap();
        assert_eq!(res.status, 404);
        assert_eq!(res.reason, "Not found");
        assert_eq!(res.body.unwrap(), b"sorry");
    }

    #[test]
    fn response_reads_until_close_without_framing() {
        let mut parser = HttpParser::new(ParserMode::Response);
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(b"HTTP/1.0 200 OK\r\n\r\npartial").unwrap();
        assert_eq!(parser.run(&mut buf), RecvStatus::Again);
        buf.put_bytes(b" and more").unwrap();
        assert_eq!(parser.run(&mut buf), RecvStatus::Again);
        // Connection closed: no new bytes.
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        let res = parser.response(&buf).unwrap();
        assert_eq!(res.body.unwrap(), b"partial and more");
    }

    #[test]
    fn reset_allows_next_request_after_discard() {
        let mut parser = HttpParser::new(ParserMode::Request);
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        assert_eq!(parser.request(&buf).unwrap().path, "/one");

        parser.reset();
        buf.discard_processed();
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        assert_eq!(parser.request(&buf).unwrap().path, "/two");
    }
}
