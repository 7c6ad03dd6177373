//! Percent encoding and a minimal URL parser for the client side.

use crate::{Error, ErrorCode, Result, net_error};

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Url {
    /// Parses `http://` and `https://` URLs of the form
    /// `scheme://host[:port][/path]`.
    pub fn parse(input: &str) -> Result<Self> {
        let (scheme, rest) = if let Some(rest) = input.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = input.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            return Err(net_error!(ErrorCode::NotSupported, "unsupported url scheme: {input}"));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_owned()),
            None => (rest, "/".to_owned()),
        };

        let (host, port) = match authority.find(':') {
            Some(idx) => {
                let port_str = &authority[idx + 1..];
                if port_str.is_empty() || !port_str.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(net_error!(ErrorCode::InvalidArg, "invalid port in url: {input}"));
                }
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| net_error!(ErrorCode::InvalidArg, "port out of range: {port_str}"))?;
                (&authority[..idx], port)
            }
            None => (authority, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(net_error!(ErrorCode::InvalidArg, "empty host in url: {input}"));
        }

        Ok(Self { scheme, host: host.to_owned(), port, path })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme.as_str(), self.host, self.port, self.path)
    }
}

/// Percent-encodes everything outside the unreserved set
/// `[A-Za-z0-9.-_~]`.
pub fn encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &c in s.as_bytes() {
        if c.is_ascii_alphanumeric() || matches!(c, b'.' | b'-' | b'_' | b'~') {
            out.push(c as char);
        } else {
            out.push('%');
            out.push(HEX_CHARS[(c >> 4) as usize] as char);
            out.push(HEX_CHARS[(c & 0xf) as usize] as char);
        }
    }
    out
}

/// Reverses [`encode`]. Truncated or malformed escapes are rejected.
pub fn decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c != b'%' {
            out.push(c);
            i += 1;
            continue;
        }
        if i + 3 > bytes.len() {
            return Err(net_error!(ErrorCode::InvalidArg, "truncated escape in: {s}"));
        }
        let hi = hex_value(bytes[i + 1]).ok_or_else(|| invalid_escape(s))?;
        let lo = hex_value(bytes[i + 2]).ok_or_else(|| invalid_escape(s))?;
        out.push((hi << 4) | lo);
        i += 3;
    }
    String::from_utf8(out).map_err(|_| net_error!(ErrorCode::InvalidArg, "decoded bytes not utf-8"))
}

fn invalid_escape(s: &str) -> Error {
    net_error!(ErrorCode::InvalidArg, "invalid escape in: {s}")
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(10 + c - b'A'),
        b'a'..=b'f' => Some(10 + c - b'a'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_ascii() {
        let all: String = (0x20u8..0x7f).map(|c| c as char).collect();
        assert_eq!(decode(&encode(&all)).unwrap(), all);
    }

    #[test]
    fn unreserved_stays_verbatim() {
        assert_eq!(encode("abc-XYZ_0.9~"), "abc-XYZ_0.9~");
        assert_eq!(encode("a b&c"), "a%20b%26c");
    }

    #[test]
    fn decode_rejects_truncated_escape() {
        assert!(decode("abc%4").is_err());
        assert!(decode("abc%").is_err());
        assert!(decode("abc%zz").is_err());
    }

    #[test]
    fn parses_full_url() {
        let url = Url::parse("https://example.org:8443/a/b?x=1").unwrap();
        assert_eq!(url.scheme, Scheme::Https);
        assert_eq!(url.host, "example.org");
        assert_eq!(url.port, 8443);
        assert_eq!(url.path, "/a/b?x=1");
    }

    #[test]
    fn default_ports_per_scheme() {
        assert_eq!(Url::parse("http://h").unwrap().port, 80);
        assert_eq!(Url::parse("https://h/x").unwrap().port, 443);
    }

    #[test]
    fn rejects_unknown_scheme_and_bad_port() {
        assert!(Url::parse("ftp://h").is_err());
        assert!(Url::parse("http://h:99999").is_err());
        assert!(Url::parse("http://h:abc").is_err());
    }
}
