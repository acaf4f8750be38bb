//! UDP listener and response transmitter

use crate::command::CommandRequest;
use bytes::Bytes;
use impish_shared::{wire::MAX_COMMAND_LEN, CodecError, ExecutionResult, ResponseStream};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::debug;

/// Receives command datagrams on the service socket
pub struct UdpListener {
    socket: Arc<UdpSocket>,
}

impl UdpListener {
    /// Bind the service socket
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Shared handle to the socket, for replying from the same port
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Wait for the next datagram
    ///
    /// Datagrams longer than [`MAX_COMMAND_LEN`] are truncated by the socket.
    /// Interrupted receives are retried; any other error is returned.
    pub async fn receive(&self) -> io::Result<CommandRequest> {
        let mut buf = [0u8; MAX_COMMAND_LEN];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((n, sender)) => {
                    return Ok(CommandRequest {
                        payload: Bytes::copy_from_slice(&buf[..n]),
                        sender,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("Receive interrupted, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Errors that abandon a single response stream
#[derive(Error, Debug)]
pub enum TransmitError {
    #[error("Failed to chunk response: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to send datagram {sent} to {dest}: {source}")]
    Send {
        dest: SocketAddr,
        sent: usize,
        #[source]
        source: io::Error,
    },
}

/// Sends framed, chunked responses back to requesters
pub struct Transmitter {
    socket: Arc<UdpSocket>,
    chunk_size: usize,
    pad_final_chunk: bool,
    /// Held for a whole stream so two streams never interleave on the wire
    stream_lock: Mutex<()>,
}

impl Transmitter {
    pub fn new(socket: Arc<UdpSocket>, chunk_size: usize, pad_final_chunk: bool) -> Self {
        Self {
            socket,
            chunk_size,
            pad_final_chunk,
            stream_lock: Mutex::new(()),
        }
    }

    /// Frame `result`, send every chunk in order, then the sentinel
    ///
    /// Returns the number of chunk datagrams sent, excluding the sentinel.
    pub async fn respond(
        &self,
        dest: SocketAddr,
        result: &ExecutionResult,
    ) -> Result<usize, TransmitError> {
        let stream = ResponseStream::split(result.frame(), self.chunk_size, self.pad_final_chunk)?;
        let _guard = self.stream_lock.lock().await;

        for (sent, datagram) in stream.datagrams().enumerate() {
            self.send(dest, sent, &datagram).await?;
        }

        debug!(
            "Sent {} chunk(s) + sentinel to {} (status={})",
            stream.len(),
            dest,
            result.status
        );
        Ok(stream.len())
    }

    async fn send(&self, dest: SocketAddr, sent: usize, datagram: &Bytes) -> Result<(), TransmitError> {
        self.socket
            .send_to(datagram, dest)
            .await
            .map(|_| ())
            .map_err(|source| TransmitError::Send { dest, sent, source })
    }
}
