//! NM protocol: self-describing typed key/value messages over TCP and
//! UDP, with servers built on the netforge engines.

mod dgram_client;
mod dgram_server;
mod message;
mod stream_client;
mod stream_conn;
mod stream_server;
mod value;
pub mod wire;

pub use dgram_client::NmDgramClient;
pub use dgram_server::{
    NmDgramHandler, NmDgramResponder, NmDgramServer, NmDgramServerOpts,
};
pub use message::NmMessage;
pub use stream_client::{NmStreamClient, NmStreamClientOpts};
pub use stream_conn::NmStreamCon;
pub use stream_server::{
    NmControl, NmStreamHandler, NmStreamServer, NmStreamServerOpts,
};
pub use value::NmValue;
pub use wire::NmParser;
