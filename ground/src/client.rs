//! One-shot client for the command executor

use anyhow::{bail, Context, Result};
use impish_shared::{
    wire::{CONTROL_TOKEN, MAX_COMMAND_LEN},
    ExecutionResult, Progress, Reassembler,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Largest datagram the client expects: chunk header plus a full payload
const RECV_BUF_LEN: usize = 2048;

pub struct GroundClient {
    socket: UdpSocket,
    target: SocketAddr,
    /// Longest silence tolerated between datagrams of one response
    idle_timeout: Duration,
}

impl GroundClient {
    pub async fn connect(bind: SocketAddr, target: SocketAddr, idle_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("Failed to bind {}", bind))?;
        Ok(Self {
            socket,
            target,
            idle_timeout,
        })
    }

    /// Ask the executor to shut down; no reply is expected
    pub async fn kill(&self) -> Result<()> {
        self.socket.send_to(CONTROL_TOKEN, self.target).await?;
        Ok(())
    }

    /// Run one command line remotely and reassemble its result
    pub async fn execute(&self, line: &str) -> Result<ExecutionResult> {
        if line.len() > MAX_COMMAND_LEN {
            bail!(
                "Command is {} bytes, limit is {}",
                line.len(),
                MAX_COMMAND_LEN
            );
        }
        if line.as_bytes().starts_with(CONTROL_TOKEN) {
            bail!("Command starts with the control token; use --kill to stop the executor");
        }

        self.socket
            .send_to(line.as_bytes(), self.target)
            .await
            .with_context(|| format!("Failed to send command to {}", self.target))?;

        let mut reassembler = Reassembler::new();
        let mut buf = [0u8; RECV_BUF_LEN];

        loop {
            let (n, from) = timeout(self.idle_timeout, self.socket.recv_from(&mut buf))
                .await
                .with_context(|| {
                    format!(
                        "Timed out after {} chunk(s) waiting for {}",
                        reassembler.received(),
                        self.target
                    )
                })??;

            if from != self.target {
                warn!("Ignoring datagram from unexpected peer {}", from);
                continue;
            }
            debug!("Received {} bytes", n);

            if let Progress::Complete(framed) = reassembler.push(&buf[..n])? {
                return Ok(ExecutionResult::parse(&framed)?);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impish_shared::{wire::CHUNK_PAYLOAD_SIZE, ResponseStream, Status};

    async fn pair() -> (GroundClient, UdpSocket) {
        let executor = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = GroundClient::connect(
            "127.0.0.1:0".parse().unwrap(),
            executor.local_addr().unwrap(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
        (client, executor)
    }

    #[tokio::test]
    async fn test_execute_reassembles_reply() {
        let (client, executor) = pair().await;
        let expected = ExecutionResult::completed(0, vec![b'x'; 2500], b"warn\n".to_vec());
        let reply = expected.clone();

        let fake = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (n, from) = executor.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"cat big.txt");

            let stream = ResponseStream::split(reply.frame(), CHUNK_PAYLOAD_SIZE, false).unwrap();
            for datagram in stream.datagrams() {
                executor.send_to(&datagram, from).await.unwrap();
            }
        });

        let result = client.execute("cat big.txt").await.expect("execute failed");
        fake.await.unwrap();
        assert_eq!(result, expected);
        assert_eq!(result.status, Status::AckOk);
    }

    #[tokio::test]
    async fn test_execute_times_out_without_reply() {
        let (client, _executor) = pair().await;
        let err = client.execute("sleep 100").await.unwrap_err();
        assert!(err.to_string().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_kill_sends_control_token() {
        let (client, executor) = pair().await;
        client.kill().await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = executor.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"KILLIT");
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_control_lines() {
        let (client, _executor) = pair().await;
        assert!(client.execute(&"a".repeat(MAX_COMMAND_LEN + 1)).await.is_err());
        assert!(client.execute("KILLIT").await.is_err());
    }
}
