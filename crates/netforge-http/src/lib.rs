//! HTTP/1.x parsing and serving, plus the RFC 6455 WebSocket stack.

mod client;
mod file_route;
mod headers;
mod http_date;
mod parser;
mod response;
mod router;
mod server;
mod upgrade;
pub mod ws;

pub use client::{ClientOpt, ClientResponse, HttpClient, basic_auth};
pub use file_route::FileRoute;
pub use headers::HeaderMap;
pub use parser::{HttpParser, ParserMode, Request, ResponseView};
pub use response::{ResponseAction, ResponseBuilder, ResponseMode};
pub use router::{Route, Router};
pub use server::{HttpControl, HttpServer, HttpServerHandler, HttpServerOpts};
pub use upgrade::{is_ws_upgrade, upgrade_to_ws, ws_accept_key, ws_protocols};

use netforge_core::{ErrorCode, Result, net_error};

/// Default limit on the combined request/status line and headers.
pub const DEF_MAX_HEADER_SIZE: usize = 8 * 1024;
/// Default limit on message bodies.
pub const DEF_MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Header names the toolkit reads or writes.
pub mod header {
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const DATE: &str = "Date";
    pub const EXPIRES: &str = "Expires";
    pub const HOST: &str = "Host";
    pub const SERVER: &str = "Server";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const UPGRADE: &str = "Upgrade";
    pub const USER_AGENT: &str = "User-Agent";
    pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

    pub const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";
    pub const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
    pub const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";
    pub const SEC_WEBSOCKET_VERSION: &str = "Sec-WebSocket-Version";
}

/// Header values matched case-insensitively.
pub mod value {
    pub const CHUNKED: &str = "chunked";
    pub const CLOSE: &str = "close";
    pub const IDENTITY: &str = "identity";
    pub const KEEP_ALIVE: &str = "keep-alive";
    pub const UPGRADE: &str = "Upgrade";
    pub const WEBSOCKET: &str = "websocket";
}

/// Product token sent in `Server` and `User-Agent` headers.
pub const SERVER_IDENT: &str = concat!("netforge/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Patch,
    Delete,
    Trace,
    Options,
    Connect,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Trace => "TRACE",
            Self::Options => "OPTIONS",
            Self::Connect => "CONNECT",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(match bytes {
            b"GET" => Self::Get,
            b"POST" => Self::Post,
            b"HEAD" => Self::Head,
            b"PUT" => Self::Put,
            b"PATCH" => Self::Patch,
            b"DELETE" => Self::Delete,
            b"TRACE" => Self::Trace,
            b"OPTIONS" => Self::Options,
            b"CONNECT" => Self::Connect,
            other => {
                return Err(net_error!(
                    ErrorCode::NotFound,
                    "unknown http method: {}",
                    String::from_utf8_lossy(other)
                ));
            }
        })
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }

    pub fn from_digits(major: u32, minor: u32) -> Result<Self> {
        match (major, minor) {
            (1, 0) => Ok(Self::Http10),
            (1, 1) => Ok(Self::Http11),
            _ => Err(net_error!(ErrorCode::NotFound, "unsupported http version {major}.{minor}")),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason phrase for a status code; unknown codes get "Unknown".
pub fn status_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",

        200 => "OK",

        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        303 => "See other",
        304 => "Not modified",
        305 => "Use proxy",
        306 => "Reserved",
        307 => "Temporary redirect",
        308 => "Permanent redirect",

        400 => "Bad request",
        401 => "Unauthorized",
        402 => "Reserved",
        403 => "Forbidden",
        404 => "Not found",
        405 => "Method not allowed",

        500 => "Internal server error",
        501 => "Not implemented",
        502 => "Bad gateway",
        503 => "Service unavailable",
        504 => "Gateway timeout",
        505 => "HTTP Version not supported",

        _ => "Unknown",
    }
}

/// True when `list` (a comma-separated header value) contains `needle`,
/// compared case-insensitively with surrounding whitespace ignored.
pub(crate) fn list_contains(list: &str, needle: &str) -> bool {
    list.split(',').any(|item| item.trim().eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_nine_methods_parse() {
        for m in ["GET", "POST", "HEAD", "PUT", "PATCH", "DELETE", "TRACE", "OPTIONS", "CONNECT"] {
            assert_eq!(Method::from_bytes(m.as_bytes()).unwrap().as_str(), m);
        }
        assert!(Method::from_bytes(b"BREW").is_err());
    }

    #[test]
    fn version_resolution() {
        assert_eq!(Version::from_digits(1, 0).unwrap(), Version::Http10);
        assert_eq!(Version::from_digits(1, 1).unwrap(), Version::Http11);
        assert!(Version::from_digits(2, 0).is_err());
        assert!(Version::from_digits(1, 2).is_err());
    }

    #[test]
    fn list_matching_is_case_insensitive() {
        assert!(list_contains("gzip, Chunked", "chunked"));
        assert!(list_contains("keep-alive , Upgrade", "upgrade"));
        assert!(!list_contains("identity", "chunked"));
    }
}
