//! Resumable non-blocking writers over heterogeneous data sources.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use netforge_core::{ByteBuf, ErrorCode, Result, net_error};

use crate::socket::{Socket, WriteOutcome};

/// Scratch size for streaming file contents.
const FILE_BUF_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitStatus {
    /// Data remains; retry on write readiness.
    Again,
    /// This emitter produced everything it had.
    Complete,
}

/// A source of bytes that can be pushed to a socket in increments.
pub trait Emit: Send {
    /// Number of bytes this emitter will produce in total.
    fn total_len(&self) -> u64;

    /// Writes as much as the socket takes right now.
    fn try_write(&mut self, sock: &Socket) -> Result<EmitStatus>;
}

/// Emitter over shared immutable bytes. Sharing the payload makes
/// fan-out of one response body to many connections cheap.
pub struct SliceEmitter {
    data: Arc<[u8]>,
    pos: usize,
}

impl SliceEmitter {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self { data, pos: 0 }
    }
}

impl Emit for SliceEmitter {
    fn total_len(&self) -> u64 {
        self.data.len() as u64
    }

    fn try_write(&mut self, sock: &Socket) -> Result<EmitStatus> {
        match sock.write(&self.data[self.pos..])? {
            WriteOutcome::Complete(_) => Ok(EmitStatus::Complete),
            WriteOutcome::Again(n) => {
                self.pos += n;
                Ok(EmitStatus::Again)
            }
        }
    }
}

/// Emitter over an owned buffer's written bytes.
pub struct BufEmitter {
    buf: ByteBuf,
    pos: usize,
}

impl BufEmitter {
    pub fn new(buf: ByteBuf) -> Self {
        Self { buf, pos: 0 }
    }
}

impl Emit for BufEmitter {
    fn total_len(&self) -> u64 {
        self.buf.used() as u64
    }

    fn try_write(&mut self, sock: &Socket) -> Result<EmitStatus> {
        match sock.write(&self.buf.as_slice()[self.pos..])? {
            WriteOutcome::Complete(_) => Ok(EmitStatus::Complete),
            WriteOutcome::Again(n) => {
                self.pos += n;
                Ok(EmitStatus::Again)
            }
        }
    }
}

/// Streams an open file in 4 KiB reads; partial socket writes resume
/// from the internal scratch. The file handle closes when the emitter
/// is dropped.
pub struct FileEmitter {
    file: File,
    len: u64,
    scratch: Box<[u8; FILE_BUF_SIZE]>,
    used: usize,
    written: usize,
}

impl FileEmitter {
    pub fn new(file: File) -> Result<Self> {
        let len = file
            .metadata()
            .map_err(|e| net_error!(ErrorCode::IoUnknown, "file metadata: {e}"))?
            .len();
        Ok(Self { file, len, scratch: Box::new([0; FILE_BUF_SIZE]), used: 0, written: 0 })
    }
}

impl Emit for FileEmitter {
    fn total_len(&self) -> u64 {
        self.len
    }

    fn try_write(&mut self, sock: &Socket) -> Result<EmitStatus> {
        loop {
            if self.written < self.used {
                match sock.write(&self.scratch[self.written..self.used])? {
                    WriteOutcome::Complete(_) => {
                        self.used = 0;
                        self.written = 0;
                    }
                    WriteOutcome::Again(n) => {
                        self.written += n;
                        // Keep the unwritten tail at the front so the
                        // next refill appends behind it.
                        self.scratch.copy_within(self.written..self.used, 0);
                        self.used -= self.written;
                        self.written = 0;
                        return Ok(EmitStatus::Again);
                    }
                }
            }

            let n = self
                .file
                .read(&mut self.scratch[self.used..])
                .map_err(|e| net_error!(ErrorCode::IoUnknown, "file read: {e}"))?;
            if n == 0 {
                return Ok(EmitStatus::Complete);
            }
            self.used += n;
        }
    }
}

/// An ordered sequence of emitters; completed heads are dropped as the
/// chain advances.
#[derive(Default)]
pub struct EmitterChain {
    emitters: VecDeque<Box<dyn Emit>>,
}

impl EmitterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, emitter: Box<dyn Emit>) {
        self.emitters.push_back(emitter);
    }

    /// Moves every emitter of `other` to the end of this chain.
    pub fn append(&mut self, other: &mut Self) {
        self.emitters.append(&mut other.emitters);
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    /// Sum of the remaining emitters' lengths, overflow-checked.
    pub fn total_len(&self) -> Result<u64> {
        let mut sum: u64 = 0;
        for emitter in &self.emitters {
            sum = sum
                .checked_add(emitter.total_len())
                .ok_or_else(|| net_error!(ErrorCode::Overflow, "emitter chain length"))?;
        }
        Ok(sum)
    }

    /// Runs the chain until everything is written, a write blocks, or an
    /// emitter fails. Completed emitters are released immediately.
    pub fn try_write(&mut self, sock: &Socket) -> Result<EmitStatus> {
        while let Some(head) = self.emitters.front_mut() {
            match head.try_write(sock)? {
                EmitStatus::Complete => {
                    self.emitters.pop_front();
                }
                EmitStatus::Again => return Ok(EmitStatus::Again),
            }
        }
        Ok(EmitStatus::Complete)
    }
}
