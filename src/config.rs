//! Service configuration and command-line parsing

use clap::builder::TypedValueParser;
use clap::Parser;
use impish_shared::codec::HEADER_LEN;
use impish_shared::wire::{CHUNK_PAYLOAD_SIZE, DEFAULT_PORT, MAX_RESPONSE_LEN};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default number of commands allowed to wait behind the running one
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Default cap on captured bytes per output stream (16 MiB)
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

/// Largest per-stream capture whose framed response still fits [`MAX_RESPONSE_LEN`]
pub const MAX_CAPTURE_BYTES: usize = MAX_RESPONSE_LEN / 2 - 1024;

/// Payload bytes per chunk so that header plus payload fits one 1024-byte datagram
pub const DEFAULT_CHUNK_SIZE: usize = CHUNK_PAYLOAD_SIZE - HEADER_LEN;

/// Shell used to interpret command lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Interpreter program
    pub program: String,
    /// Arguments making the interpreter read its script from stdin
    pub args: Vec<String>,
    /// Bytes kept per output stream before the rest is discarded
    pub max_capture_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "bash".into(),
            args: vec!["-l".into(), "-s".into()],
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

/// Configuration for the command executor service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Address the UDP socket binds to
    pub bind_addr: SocketAddr,
    /// Commands that may wait while another executes
    pub queue_depth: usize,
    /// Payload bytes per response chunk
    pub chunk_size: usize,
    /// Zero-pad the final chunk of every stream to `chunk_size`
    pub pad_final_chunk: bool,
    pub shell: ShellConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pad_final_chunk: false,
            shell: ShellConfig::default(),
        }
    }
}

/// Execute shell commands received over UDP and stream back their output
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address to bind on
    #[arg(short, long, env = "EXECUTOR_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// UDP port to listen on
    #[arg(short, long, env = "EXECUTOR_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Commands allowed to wait behind the running one before requests are answered `busy`
    #[arg(
        short,
        long,
        env = "EXECUTOR_QUEUE_DEPTH",
        default_value_t = DEFAULT_QUEUE_DEPTH,
        value_parser = clap::value_parser!(u32).range(1..=1024).map(|v| v as usize)
    )]
    pub queue_depth: usize,

    /// Shell program that interprets command lines
    #[arg(short, long, env = "EXECUTOR_SHELL", default_value = "bash")]
    pub shell: String,

    /// Arguments passed to the shell; the command line arrives on its stdin
    #[arg(
        long,
        env = "EXECUTOR_SHELL_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true,
        default_values = ["-l", "-s"]
    )]
    pub shell_args: Vec<String>,

    /// Bytes captured per output stream before the rest is discarded
    #[arg(
        long,
        env = "EXECUTOR_MAX_CAPTURE",
        default_value_t = DEFAULT_MAX_CAPTURE_BYTES,
        value_parser = clap::value_parser!(u64)
            .range(0..=MAX_CAPTURE_BYTES as u64)
            .map(|v| v as usize)
    )]
    pub max_capture_bytes: usize,

    /// Zero-pad the final chunk of each response to the full chunk size
    #[arg(long, env = "EXECUTOR_PAD_FINAL_CHUNK")]
    pub pad_final_chunk: bool,
}

impl Args {
    pub fn into_config(self) -> ServiceConfig {
        ServiceConfig {
            bind_addr: SocketAddr::new(self.bind, self.port),
            queue_depth: self.queue_depth,
            pad_final_chunk: self.pad_final_chunk,
            shell: ShellConfig {
                program: self.shell,
                args: self.shell_args,
                max_capture_bytes: self.max_capture_bytes,
            },
            ..Default::default()
        }
    }
}
