//! Reactor-style networking substrate: socket abstraction (plain and
//! TLS), readiness notification, stream and datagram server engines,
//! and resumable socket emitters.

pub mod addr;
mod conn;
mod dgram_server;
mod emitter;
mod plain;
mod poller;
mod socket;
mod state;
mod stream_server;
#[cfg(test)]
mod testutil;
mod tls;

pub use conn::SocketCon;
pub use dgram_server::{
    Dgram, DgramControl, DgramHandler, DgramSender, DgramServer, DgramServerOpts,
};
pub use emitter::{BufEmitter, Emit, EmitStatus, EmitterChain, FileEmitter, SliceEmitter};
pub use poller::SocketEvent;
pub use socket::{Socket, SocketKind, WriteOutcome};
pub use state::{EventSet, RecvStatus, SocketState};
pub use stream_server::{StreamControl, StreamHandler, StreamServer, StreamServerOpts};
pub use tls::{TlsClientOpts, TlsServerOpts};
