//! Command handling for the executor service
//!
//! This module handles:
//! - Classifying datagrams as control tokens or command lines
//! - Running command lines in a shell subprocess
//! - Queuing commands for the single execution worker

pub mod dispatcher;
mod executor;
mod worker;

use bytes::Bytes;
use std::net::SocketAddr;

pub use dispatcher::{classify, Dispatch};
pub use executor::{CommandRunner, ExecError, ShellExecutor};
pub use worker::{run_worker, Job};

/// A received datagram and the address to answer
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub payload: Bytes,
    pub sender: SocketAddr,
}
