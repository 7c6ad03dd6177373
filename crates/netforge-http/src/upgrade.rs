//! WebSocket upgrade handshake (server side).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use netforge_core::{ErrorCode, Result, net_error};
use sha1::{Digest, Sha1};

use crate::parser::Request;
use crate::response::{ResponseAction, ResponseBuilder, ResponseMode};
use crate::{header, list_contains, value};

const WS_VERSION: &str = "13";
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const WS_MAX_KEY_LEN: usize = 128;

/// Whether the request asks for a WebSocket upgrade the server can
/// answer: `Connection: Upgrade`, `Upgrade: websocket`, version 13 and a
/// non-empty key.
pub fn is_ws_upgrade(req: &Request<'_>) -> bool {
    let connection_upgrades = req
        .headers
        .get(header::CONNECTION)
        .is_some_and(|v| list_contains(v, value::UPGRADE));
    if !connection_upgrades {
        return false;
    }
    if req.headers.get(header::UPGRADE) != Some(value::WEBSOCKET) {
        return false;
    }
    if req.headers.get(header::SEC_WEBSOCKET_VERSION) != Some(WS_VERSION) {
        return false;
    }
    req.headers.get(header::SEC_WEBSOCKET_KEY).is_some_and(|key| !key.is_empty())
}

/// Subprotocols offered by the client, in request order.
pub fn ws_protocols(req: &Request<'_>) -> Vec<String> {
    req.headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .map(|line| line.split(',').map(|p| p.trim().to_owned()).collect())
        .unwrap_or_default()
}

/// `Sec-WebSocket-Accept` value for a request key.
pub fn ws_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Answers the handshake with `101 Switching Protocols` and marks the
/// response for connection takeover. `protocol` is echoed when the
/// server picked one of the client's offers.
pub fn upgrade_to_ws(
    req: &Request<'_>,
    res: &mut ResponseBuilder,
    protocol: Option<&str>,
) -> Result<()> {
    let key = req
        .headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or_else(|| net_error!(ErrorCode::InvalidArg, "missing websocket key"))?;
    if key.len() > WS_MAX_KEY_LEN {
        return Err(net_error!(ErrorCode::InvalidArg, "websocket key too long"));
    }

    res.set_action(ResponseAction::UpgradeWs, protocol.map(str::to_owned))?;
    res.begin(ResponseMode::Fixed, 101)?;
    res.header(header::CONNECTION, value::UPGRADE)?;
    res.header(header::UPGRADE, value::WEBSOCKET)?;
    res.header(header::SEC_WEBSOCKET_ACCEPT, &ws_accept_key(key))?;
    if let Some(protocol) = protocol {
        res.header(header::SEC_WEBSOCKET_PROTOCOL, protocol)?;
    }
    res.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_sample() {
        assert_eq!(ws_accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
