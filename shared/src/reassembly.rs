//! Receiver-side reassembly of a response stream
//!
//! Chunks may arrive out of order; they are keyed by sequence number and
//! stitched back together once the sentinel arrives. Loss is detected, not
//! repaired.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::codec::{CodecError, ResponseChunk};
use crate::is_sentinel;
use crate::wire::MAX_RESPONSE_LEN;

/// Errors surfaced while reassembling a stream
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("Invalid chunk: {0}")]
    Codec(#[from] CodecError),

    #[error("Chunk {sequence} declares total length {declared}, stream declared {expected}")]
    LengthMismatch {
        sequence: u32,
        declared: u32,
        expected: u32,
    },

    #[error("Declared response length {0} exceeds {MAX_RESPONSE_LEN} bytes")]
    TooLarge(u32),

    #[error("Duplicate chunk {0} with different payload")]
    ConflictingDuplicate(u32),

    #[error("Stream ended without any chunks")]
    Empty,

    #[error("Missing chunk {0}")]
    MissingChunk(u32),

    #[error("Stream short: have {have} bytes, declared {declared}")]
    Short { have: usize, declared: usize },

    #[error("Stream already finished")]
    AlreadyFinished,
}

/// Outcome of feeding one datagram to a [`Reassembler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// A chunk was stored; more are expected
    Pending,
    /// The sentinel arrived; the framed response is complete
    Complete(Bytes),
}

/// Accumulates chunk datagrams until the sentinel
#[derive(Debug, Default)]
pub struct Reassembler {
    chunks: BTreeMap<u32, Bytes>,
    total_len: Option<u32>,
    finished: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct chunks received so far
    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    /// Feed one datagram
    pub fn push(&mut self, datagram: &[u8]) -> Result<Progress, ReassemblyError> {
        if self.finished {
            return Err(ReassemblyError::AlreadyFinished);
        }

        if is_sentinel(datagram) {
            self.finished = true;
            return self.assemble().map(Progress::Complete);
        }

        let chunk = ResponseChunk::decode(datagram)?;
        let sequence = chunk.header.sequence;

        if chunk.header.total_len as usize > MAX_RESPONSE_LEN {
            return Err(ReassemblyError::TooLarge(chunk.header.total_len));
        }

        match self.total_len {
            Some(expected) if expected != chunk.header.total_len => {
                return Err(ReassemblyError::LengthMismatch {
                    sequence,
                    declared: chunk.header.total_len,
                    expected,
                });
            }
            Some(_) => {}
            None => self.total_len = Some(chunk.header.total_len),
        }

        if let Some(existing) = self.chunks.get(&sequence) {
            if *existing != chunk.payload {
                return Err(ReassemblyError::ConflictingDuplicate(sequence));
            }
            return Ok(Progress::Pending);
        }

        self.chunks.insert(sequence, chunk.payload);
        Ok(Progress::Pending)
    }

    fn assemble(&self) -> Result<Bytes, ReassemblyError> {
        let declared = self.total_len.ok_or(ReassemblyError::Empty)? as usize;

        let mut buf = BytesMut::with_capacity(declared);
        for (expected, (&sequence, payload)) in (0u32..).zip(self.chunks.iter()) {
            if sequence != expected {
                return Err(ReassemblyError::MissingChunk(expected));
            }
            buf.put_slice(payload);
        }

        if buf.len() < declared {
            return Err(ReassemblyError::Short {
                have: buf.len(),
                declared,
            });
        }

        // Anything past the declared length is final-chunk padding
        buf.truncate(declared);
        Ok(buf.freeze())
    }
}
