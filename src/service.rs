//! Service context and receive loop
//!
//! The receive loop never runs commands itself. It classifies each
//! datagram and hands command lines to a bounded queue drained by a single
//! worker, so exactly one command executes at a time. When the queue is
//! full the requester is answered immediately with a `busy` stream.

use crate::command::{classify, run_worker, CommandRunner, Dispatch, Job, ShellExecutor};
use crate::config::ServiceConfig;
use crate::transport::{Transmitter, UdpListener};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use impish_shared::ExecutionResult;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Owns the socket, queue and worker for one service lifetime
pub struct Service {
    config: ServiceConfig,
    listener: UdpListener,
    transmitter: Arc<Transmitter>,
    runner: Arc<dyn CommandRunner>,
}

impl Service {
    /// Bind the service socket using the configured shell
    pub async fn bind(config: ServiceConfig) -> Result<Self> {
        let runner = Arc::new(ShellExecutor::new(config.shell.clone()));
        Self::bind_with_runner(config, runner).await
    }

    /// Bind the service socket with a custom command runner
    pub async fn bind_with_runner(
        config: ServiceConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let listener = UdpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind UDP socket on {}", config.bind_addr))?;

        let transmitter = Arc::new(Transmitter::new(
            listener.socket(),
            config.chunk_size,
            config.pad_final_chunk,
        ));

        Ok(Self {
            config,
            listener,
            transmitter,
            runner,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until the control token arrives
    ///
    /// Returns `Ok(())` on the control token. Receive failures and loss of
    /// the worker are returned as errors. Any command still running when
    /// this returns is killed.
    pub async fn run(self) -> Result<()> {
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_depth);
        let worker = TaskGuard(tokio::spawn(run_worker(
            queue_rx,
            self.runner.clone(),
            self.transmitter.clone(),
        )));
        let (busy, busy_task) = BusyReplies::spawn(self.transmitter.clone(), BUSY_BACKLOG);

        info!(
            "Listening on {} (queue depth {}, shell {} {:?})",
            self.local_addr()?,
            self.config.queue_depth,
            self.config.shell.program,
            self.config.shell.args
        );

        loop {
            let request = self
                .listener
                .receive()
                .await
                .context("Failed to receive datagram")?;

            debug!(
                "Received {} bytes from {}",
                request.payload.len(),
                request.sender
            );

            let line = match classify(&request.payload) {
                Dispatch::Shutdown => {
                    info!("Control token received from {}, shutting down", request.sender);
                    drop(worker);
                    drop(busy_task);
                    return Ok(());
                }
                Dispatch::Execute(line) => Bytes::copy_from_slice(line),
            };

            let job = Job {
                line,
                sender: request.sender,
            };

            match queue_tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => {
                    warn!("Queue full, answering {} with busy", job.sender);
                    busy.reject(job.sender);
                }
                Err(TrySendError::Closed(_)) => {
                    error!("Execution worker is gone");
                    return Err(anyhow!("Execution worker stopped unexpectedly"));
                }
            }
        }
    }
}

/// `busy` replies waiting to be sent before further rejections go unanswered
const BUSY_BACKLOG: usize = 32;

/// Sends `busy` replies from one task so a long in-flight stream cannot
/// stall the receive loop
struct BusyReplies {
    tx: mpsc::Sender<SocketAddr>,
}

impl BusyReplies {
    fn spawn(transmitter: Arc<Transmitter>, backlog: usize) -> (Self, TaskGuard) {
        let (tx, mut rx) = mpsc::channel::<SocketAddr>(backlog);
        let task = tokio::spawn(async move {
            while let Some(sender) = rx.recv().await {
                if let Err(e) = transmitter.respond(sender, &ExecutionResult::busy()).await {
                    error!("Failed to send busy response to {}: {}", sender, e);
                }
            }
        });
        (Self { tx }, TaskGuard(task))
    }

    /// Queue a `busy` reply; returns false if it was dropped because the backlog is full
    fn reject(&self, sender: SocketAddr) -> bool {
        match self.tx.try_send(sender) {
            Ok(()) => true,
            Err(TrySendError::Full(sender)) => {
                warn!("Busy backlog full, leaving {} unanswered", sender);
                false
            }
            Err(TrySendError::Closed(sender)) => {
                error!("Busy responder is gone, leaving {} unanswered", sender);
                false
            }
        }
    }
}

/// Aborts a background task when dropped; for the worker this also kills
/// any running command
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
