//! IMPISH Shared Wire Types
//!
//! This crate provides the response framing, chunk codec and reassembly
//! logic shared by the command executor service and the ground tooling
//! that talks to it.

pub mod codec;
pub mod framing;
pub mod reassembly;

pub use codec::{ChunkHeader, CodecError, ResponseChunk, ResponseStream};
pub use framing::{ExecutionResult, FramingError, Status};
pub use reassembly::{Progress, ReassemblyError, Reassembler};

/// Fixed protocol parameters
pub mod wire {
    /// Default UDP port the command executor listens on
    pub const DEFAULT_PORT: u16 = 35000;

    /// Largest command datagram accepted; anything longer is truncated by the socket
    pub const MAX_COMMAND_LEN: usize = 1024;

    /// Largest payload carried by a single response chunk
    pub const CHUNK_PAYLOAD_SIZE: usize = 1024;

    /// Datagram prefix that terminates the service instead of running a command
    pub const CONTROL_TOKEN: &[u8; 6] = b"KILLIT";

    /// Terminal datagram closing every response stream
    pub const SENTINEL: &[u8; 8] = b"finished";

    /// Largest framed response a stream may declare (64 MiB)
    pub const MAX_RESPONSE_LEN: usize = 64 * 1024 * 1024;

    /// Exit code reported when no process exit code exists
    pub const NO_EXIT_CODE: i32 = -1;
}

/// Returns true if `datagram` is the end-of-stream sentinel
pub fn is_sentinel(datagram: &[u8]) -> bool {
    datagram == wire::SENTINEL
}

/// Returns true if `datagram` begins with the control token
pub fn is_control(datagram: &[u8]) -> bool {
    datagram.starts_with(wire::CONTROL_TOKEN)
}
