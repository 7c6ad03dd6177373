mod bytebuf;
mod error;
mod latch;
pub mod url;

pub use bytebuf::{ByteBuf, ByteOrder};
pub use error::{Error, ErrorCode, Result};
pub use latch::Latch;
