//! RFC 6455 WebSocket framing, parsing and connections.

mod client;
mod conn;
pub(crate) mod frame;
mod parser;

pub use client::{WsClient, WsClientOpts};
pub use conn::WsConn;
pub use parser::WsParser;

use std::sync::Arc;

/// Which side of the connection this endpoint is. Servers require
/// masked input and send unmasked; clients the reverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WsMode {
    Server,
    Client,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WsMsgType {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

/// A complete WebSocket message, data or control.
///
/// Messages delivered by a server carry the originating connection;
/// client-side decoded messages do not.
pub struct WsMessage {
    pub kind: WsMsgType,
    pub payload: Vec<u8>,
    pub con: Option<Arc<WsConn>>,
}

impl WsMessage {
    pub(crate) fn new(kind: WsMsgType, payload: Vec<u8>) -> Self {
        Self { kind, payload, con: None }
    }
}

impl std::fmt::Debug for WsMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsMessage")
            .field("kind", &self.kind)
            .field("len", &self.payload.len())
            .finish()
    }
}
