//! Datagram classification

use impish_shared::is_control;

/// What to do with a received payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch<'a> {
    /// Control token received: stop the service without replying
    Shutdown,
    /// Run this command line
    Execute(&'a [u8]),
}

/// Classify a received payload
///
/// Command lines end at the first NUL byte, since ground tooling sends
/// zero-padded fixed-size buffers. Nothing beyond the received bytes is
/// ever returned.
pub fn classify(payload: &[u8]) -> Dispatch<'_> {
    if is_control(payload) {
        return Dispatch::Shutdown;
    }

    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    Dispatch::Execute(&payload[..end])
}
