//! Ground-side command sender for the remote command executor

mod client;

use anyhow::Result;
use clap::Parser;
use client::GroundClient;
use impish_shared::{wire::DEFAULT_PORT, Status};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::process;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Send one shell command to a remote executor and print its output
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Opt {
    /// Executor address
    #[arg(short, long, default_value_t = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT)))]
    target: SocketAddr,

    /// Local address to send from
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Seconds to wait for each response datagram
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Stop the executor instead of running a command
    #[arg(long, conflicts_with = "command")]
    kill: bool,

    /// Command line, joined with spaces
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required_unless_present = "kill")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let opt = Opt::parse();
    let client = GroundClient::connect(opt.bind, opt.target, Duration::from_secs(opt.timeout)).await?;

    if opt.kill {
        client.kill().await?;
        return Ok(());
    }

    let line = opt.command.join(" ");
    let result = client.execute(&line).await?;

    // process::exit skips destructors, so flush explicitly
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&result.stdout)?;
    stdout.flush()?;
    std::io::stderr().write_all(&result.stderr)?;

    match result.status {
        Status::AckOk => process::exit(result.exit_code.clamp(0, 255)),
        status => {
            eprintln!("executor replied {}", status);
            process::exit(1);
        }
    }
}
