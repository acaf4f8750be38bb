//! Sequenced chunk codec for UDP response streams
//!
//! A framed response is split into chunks, each sent as one datagram:
//! ```text
//! [ 4 bytes: sequence (u32, big-endian) ][ 4 bytes: total framed length (u32, big-endian) ][ N bytes: payload ]
//! ```
//!
//! Sequence numbers start at 0 for every stream. The declared total length
//! lets a receiver drop any zero padding on the final chunk without
//! guessing. The stream ends with the bare `finished` sentinel datagram.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::wire::{CHUNK_PAYLOAD_SIZE, MAX_RESPONSE_LEN, SENTINEL};

/// Size of the chunk header in bytes
pub const HEADER_LEN: usize = 8;

/// Errors that can occur during chunk encoding/decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Response too large: {0} bytes (max: {MAX_RESPONSE_LEN})")]
    ResponseTooLarge(usize),

    #[error("Chunk size must be between 1 and {CHUNK_PAYLOAD_SIZE}, got {0}")]
    InvalidChunkSize(usize),

    #[error("Datagram too short for a chunk header: {0} bytes")]
    Truncated(usize),

    #[error("Chunk payload too large: {0} bytes (max: {CHUNK_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),
}

/// Header prefixed to every chunk datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub sequence: u32,
    /// Length of the complete framed response this chunk belongs to
    pub total_len: u32,
}

/// One sequenced piece of a framed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    pub header: ChunkHeader,
    pub payload: Bytes,
}

impl ResponseChunk {
    /// Encode into a datagram
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u32(self.header.sequence);
        buf.put_u32(self.header.total_len);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a chunk datagram
    pub fn decode(datagram: &[u8]) -> Result<Self, CodecError> {
        if datagram.len() < HEADER_LEN {
            return Err(CodecError::Truncated(datagram.len()));
        }

        let payload_len = datagram.len() - HEADER_LEN;
        if payload_len > CHUNK_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge(payload_len));
        }

        let mut buf = datagram;
        let sequence = buf.get_u32();
        let total_len = buf.get_u32();

        Ok(Self {
            header: ChunkHeader {
                sequence,
                total_len,
            },
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

/// An ordered response stream for a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStream {
    chunks: Vec<ResponseChunk>,
}

impl ResponseStream {
    /// Split a framed response into sequenced chunks of at most `chunk_size` bytes
    ///
    /// With `pad_final` set the last chunk is zero-padded up to `chunk_size`;
    /// the declared total length still excludes the padding.
    pub fn split(framed: Bytes, chunk_size: usize, pad_final: bool) -> Result<Self, CodecError> {
        if chunk_size == 0 || chunk_size > CHUNK_PAYLOAD_SIZE {
            return Err(CodecError::InvalidChunkSize(chunk_size));
        }

        if framed.len() > MAX_RESPONSE_LEN {
            return Err(CodecError::ResponseTooLarge(framed.len()));
        }
        let total_len =
            u32::try_from(framed.len()).map_err(|_| CodecError::ResponseTooLarge(framed.len()))?;

        let count = framed.len().div_ceil(chunk_size).max(1);
        let mut chunks = Vec::with_capacity(count);
        let mut remaining = framed;
        let mut sequence: u32 = 0;

        loop {
            let take = remaining.len().min(chunk_size);
            let mut payload = remaining.split_to(take);

            if remaining.is_empty() && pad_final && payload.len() < chunk_size {
                let mut padded = BytesMut::with_capacity(chunk_size);
                padded.put_slice(&payload);
                padded.put_bytes(0, chunk_size - payload.len());
                payload = padded.freeze();
            }

            chunks.push(ResponseChunk {
                header: ChunkHeader {
                    sequence,
                    total_len,
                },
                payload,
            });

            if remaining.is_empty() {
                break;
            }
            sequence += 1;
        }

        Ok(Self { chunks })
    }

    pub fn chunks(&self) -> &[ResponseChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Every datagram of the stream in send order, sentinel last
    pub fn datagrams(&self) -> impl Iterator<Item = Bytes> + '_ {
        self.chunks
            .iter()
            .map(ResponseChunk::encode)
            .chain(std::iter::once(Bytes::from_static(SENTINEL)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_sentinel;

    #[test]
    fn test_single_chunk() {
        let framed = Bytes::from_static(b"ack-ok\n0\nstdout\nhi\n\nstderr\n\n");
        let stream = ResponseStream::split(framed.clone(), CHUNK_PAYLOAD_SIZE, false)
            .expect("split failed");

        assert_eq!(stream.len(), 1);
        let chunk = &stream.chunks()[0];
        assert_eq!(chunk.header.sequence, 0);
        assert_eq!(chunk.header.total_len as usize, framed.len());
        assert_eq!(chunk.payload, framed);
    }

    #[test]
    fn test_sequence_is_contiguous() {
        let framed = Bytes::from(vec![b'x'; 3 * CHUNK_PAYLOAD_SIZE + 17]);
        let stream = ResponseStream::split(framed, CHUNK_PAYLOAD_SIZE, false).expect("split failed");

        assert_eq!(stream.len(), 4);
        for (i, chunk) in stream.chunks().iter().enumerate() {
            assert_eq!(chunk.header.sequence as usize, i);
            assert!(chunk.payload.len() <= CHUNK_PAYLOAD_SIZE);
        }
        assert_eq!(stream.chunks()[3].payload.len(), 17);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let framed = Bytes::from(vec![b'y'; 2 * CHUNK_PAYLOAD_SIZE]);
        let stream = ResponseStream::split(framed, CHUNK_PAYLOAD_SIZE, false).expect("split failed");
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn test_pad_final_chunk() {
        let framed = Bytes::from_static(b"error\n-1\nstdout\n\nstderr\n\n");
        let stream = ResponseStream::split(framed.clone(), 64, true).expect("split failed");

        let chunk = &stream.chunks()[0];
        assert_eq!(chunk.payload.len(), 64);
        assert_eq!(chunk.header.total_len as usize, framed.len());
        assert!(chunk.payload[framed.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sentinel_is_last_datagram() {
        let framed = Bytes::from(vec![b'z'; 2500]);
        let stream = ResponseStream::split(framed, CHUNK_PAYLOAD_SIZE, false).expect("split failed");
        let datagrams: Vec<Bytes> = stream.datagrams().collect();

        assert_eq!(datagrams.len(), 4);
        assert!(is_sentinel(&datagrams[3]));
        assert_eq!(datagrams.iter().filter(|d| is_sentinel(d)).count(), 1);
    }

    #[test]
    fn test_encode_decode_chunk() {
        let chunk = ResponseChunk {
            header: ChunkHeader {
                sequence: 3,
                total_len: 4000,
            },
            payload: Bytes::from_static(b"payload"),
        };
        let datagram = chunk.encode();
        assert_eq!(&datagram[..4], &[0, 0, 0, 3]);
        assert_eq!(ResponseChunk::decode(&datagram).expect("decode failed"), chunk);
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(
            ResponseChunk::decode(&[0, 0, 1]),
            Err(CodecError::Truncated(3))
        );
    }

    #[test]
    fn test_invalid_chunk_size() {
        let framed = Bytes::from_static(b"abc");
        assert_eq!(
            ResponseStream::split(framed.clone(), 0, false),
            Err(CodecError::InvalidChunkSize(0))
        );
        assert_eq!(
            ResponseStream::split(framed, CHUNK_PAYLOAD_SIZE + 1, false),
            Err(CodecError::InvalidChunkSize(CHUNK_PAYLOAD_SIZE + 1))
        );
    }

    #[test]
    fn test_oversized_response_rejected() {
        let framed = Bytes::from(vec![0u8; MAX_RESPONSE_LEN + 1]);
        assert_eq!(
            ResponseStream::split(framed, CHUNK_PAYLOAD_SIZE, false),
            Err(CodecError::ResponseTooLarge(MAX_RESPONSE_LEN + 1))
        );
    }
}
