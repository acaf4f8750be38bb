//! Remote command executor
//!
//! Listens for shell command lines on a UDP port, runs each one in a shell
//! subprocess and streams back a sequenced, chunked response terminated by
//! a `finished` sentinel. A datagram starting with `KILLIT` stops the
//! service. There is no authentication: anything that can reach the port
//! can run commands as this process's user.

mod command;
mod config;
mod service;
mod transport;

use clap::Parser;
use config::Args;
use service::Service;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Args::parse().into_config();
    info!("Command executor starting on {}", config.bind_addr);

    let service = match Service::bind(config).await {
        Ok(service) => service,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = service.run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Command executor stopped");
}
