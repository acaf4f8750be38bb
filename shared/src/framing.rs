//! Textual response framing
//!
//! A command result is framed as:
//! ```text
//! <ack-ok|error|busy>\n
//! <decimal return code>\n
//! stdout\n
//! <raw stdout bytes>\n
//! stderr\n
//! <raw stderr bytes>\n
//! ```
//!
//! Output sections are raw bytes and may contain newlines. The framing
//! carries no section lengths, so [`ExecutionResult::parse`] splits stdout
//! from stderr at the first `\nstderr\n` marker.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::wire::NO_EXIT_CODE;

const STDOUT_MARKER: &[u8] = b"stdout\n";
const STDERR_MARKER: &[u8] = b"\nstderr\n";

/// Outcome class reported on the first line of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The shell launched and ran to completion, whatever its exit code
    AckOk,
    /// The shell or the requested program could not be launched, or output could not be read
    Error,
    /// The request was rejected because the execution queue was full
    Busy,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::AckOk => "ack-ok",
            Status::Error => "error",
            Status::Busy => "busy",
        }
    }

    fn from_bytes(line: &[u8]) -> Option<Self> {
        match line {
            b"ack-ok" => Some(Status::AckOk),
            b"error" => Some(Status::Error),
            b"busy" => Some(Status::Busy),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while parsing a framed response
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FramingError {
    #[error("Missing {0} line")]
    MissingLine(&'static str),

    #[error("Unknown status line: {0:?}")]
    UnknownStatus(String),

    #[error("Invalid return code: {0:?}")]
    InvalidReturnCode(String),

    #[error("Missing {0} section marker")]
    MissingMarker(&'static str),
}

/// Result of running one command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: Status,
    /// Process exit code; `-1` when no process ran to report one
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionResult {
    /// A command that launched and ran to completion
    pub fn completed(exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            status: Status::AckOk,
            exit_code,
            stdout,
            stderr,
        }
    }

    /// A command whose shell could not be launched or read
    pub fn failed() -> Self {
        Self::empty(Status::Error)
    }

    /// A command line whose program the shell could not find or execute
    ///
    /// Keeps the shell's exit code; output sections are left empty.
    pub fn not_launched(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::empty(Status::Error)
        }
    }

    /// A command rejected by queue backpressure
    pub fn busy() -> Self {
        Self::empty(Status::Busy)
    }

    fn empty(status: Status) -> Self {
        Self {
            status,
            exit_code: NO_EXIT_CODE,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Whether the shell was launched
    pub fn launched(&self) -> bool {
        self.status == Status::AckOk
    }

    /// Serialize into the textual framing
    pub fn frame(&self) -> Bytes {
        let code = self.exit_code.to_string();
        let status = self.status.as_str();

        let mut buf = BytesMut::with_capacity(
            status.len() + code.len() + self.stdout.len() + self.stderr.len() + 32,
        );

        buf.put_slice(status.as_bytes());
        buf.put_u8(b'\n');
        buf.put_slice(code.as_bytes());
        buf.put_u8(b'\n');
        buf.put_slice(STDOUT_MARKER);
        buf.put_slice(&self.stdout);
        buf.put_slice(STDERR_MARKER);
        buf.put_slice(&self.stderr);
        buf.put_u8(b'\n');

        buf.freeze()
    }

    /// Parse a fully reassembled framed response
    pub fn parse(framed: &[u8]) -> Result<Self, FramingError> {
        let (status_line, rest) = split_line(framed).ok_or(FramingError::MissingLine("status"))?;
        let status = Status::from_bytes(status_line).ok_or_else(|| {
            FramingError::UnknownStatus(String::from_utf8_lossy(status_line).into_owned())
        })?;

        let (code_line, rest) = split_line(rest).ok_or(FramingError::MissingLine("return code"))?;
        let code_text = String::from_utf8_lossy(code_line);
        let exit_code = code_text
            .parse::<i32>()
            .map_err(|_| FramingError::InvalidReturnCode(code_text.into_owned()))?;

        let rest = rest
            .strip_prefix(STDOUT_MARKER)
            .ok_or(FramingError::MissingMarker("stdout"))?;
        let split = find(rest, STDERR_MARKER).ok_or(FramingError::MissingMarker("stderr"))?;
        let stdout = rest[..split].to_vec();

        let tail = &rest[split + STDERR_MARKER.len()..];
        let stderr = tail.strip_suffix(b"\n").unwrap_or(tail).to_vec();

        Ok(Self {
            status,
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn split_line(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = buf.iter().position(|&b| b == b'\n')?;
    Some((&buf[..idx], &buf[idx + 1..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_echo_hi() {
        let result = ExecutionResult::completed(0, b"hi\n".to_vec(), Vec::new());
        assert_eq!(&result.frame()[..], b"ack-ok\n0\nstdout\nhi\n\nstderr\n\n");
    }

    #[test]
    fn test_frame_nonzero_exit_is_still_ack_ok() {
        let result = ExecutionResult::completed(2, Vec::new(), b"no such file\n".to_vec());
        assert_eq!(
            &result.frame()[..],
            b"ack-ok\n2\nstdout\n\nstderr\nno such file\n\n"
        );
    }

    #[test]
    fn test_frame_failed() {
        let framed = ExecutionResult::failed().frame();
        assert_eq!(&framed[..], b"error\n-1\nstdout\n\nstderr\n\n");
    }

    #[test]
    fn test_frame_not_launched_keeps_code() {
        let framed = ExecutionResult::not_launched(127).frame();
        assert_eq!(&framed[..], b"error\n127\nstdout\n\nstderr\n\n");
    }

    #[test]
    fn test_frame_busy() {
        let framed = ExecutionResult::busy().frame();
        assert_eq!(&framed[..], b"busy\n-1\nstdout\n\nstderr\n\n");
        assert!(!ExecutionResult::busy().launched());
    }

    #[test]
    fn test_parse_binary_output() {
        let expected = ExecutionResult::completed(
            7,
            vec![0, 1, b'\n', 255, b'\n'],
            b"line one\nline two".to_vec(),
        );
        let parsed = ExecutionResult::parse(&expected.frame()).expect("parse failed");
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        let err = ExecutionResult::parse(b"maybe\n0\nstdout\n\nstderr\n\n").unwrap_err();
        assert_eq!(err, FramingError::UnknownStatus("maybe".into()));
    }

    #[test]
    fn test_parse_rejects_bad_code() {
        let err = ExecutionResult::parse(b"ack-ok\nzero\nstdout\n\nstderr\n\n").unwrap_err();
        assert!(matches!(err, FramingError::InvalidReturnCode(_)));
    }

    #[test]
    fn test_parse_missing_stderr_marker() {
        let err = ExecutionResult::parse(b"ack-ok\n0\nstdout\nhi\n").unwrap_err();
        assert_eq!(err, FramingError::MissingMarker("stderr"));
    }
}
