//! Single execution worker draining the command queue

use super::executor::CommandRunner;
use crate::transport::Transmitter;
use bytes::Bytes;
use impish_shared::ExecutionResult;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A command line waiting for execution
#[derive(Debug, Clone)]
pub struct Job {
    pub line: Bytes,
    pub sender: SocketAddr,
}

/// Run queued jobs one at a time until the queue closes
///
/// Each job's response stream is fully transmitted before the next job
/// starts. Launch and read failures are answered with an `error` stream;
/// none of them stop the worker.
pub async fn run_worker(
    mut queue: mpsc::Receiver<Job>,
    runner: Arc<dyn CommandRunner>,
    transmitter: Arc<Transmitter>,
) {
    while let Some(job) = queue.recv().await {
        let started = Instant::now();
        info!(
            "Executing command from {}: {:?}",
            job.sender,
            String::from_utf8_lossy(&job.line)
        );

        let result = match runner.run(&job.line).await {
            Ok(result) => {
                info!(
                    "  Command finished: exit={} stdout={}B stderr={}B ({}ms)",
                    result.exit_code,
                    result.stdout.len(),
                    result.stderr.len(),
                    started.elapsed().as_millis()
                );
                result
            }
            Err(e) => {
                warn!("  Command failed: {}", e);
                ExecutionResult::failed()
            }
        };

        if let Err(e) = transmitter.respond(job.sender, &result).await {
            error!("Failed to send response to {}: {}", job.sender, e);
        }
    }

    info!("Command queue closed, worker exiting");
}
