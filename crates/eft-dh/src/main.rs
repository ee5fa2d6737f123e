//! eft-dh - Diffie-Hellman encrypted file transfer
//!
//! Server mode receives one payload and writes it to disk; client mode sends
//! standard input.

use clap::Parser;
use eft_dh::config::{Config, Mode};
use eft_dh::endpoint::{receive_one, send_one};
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env()
        .add_directive("eft_dh=info".parse().unwrap())
        .add_directive("dhlink_net=info".parse().unwrap());
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Transfer failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let settings = config.transfer_settings();
    match config.mode()? {
        Mode::Server { listen } => {
            let listener = TcpListener::bind(listen).await?;
            info!("Listening on {} (kdf: {})", listen, settings.kdf);
            receive_one(listener, &config.output, &settings).await?;
        }
        Mode::Client { server } => {
            let mut payload = Vec::new();
            tokio::io::stdin().read_to_end(&mut payload).await?;
            send_one(&server, &payload, &settings).await?;
        }
    }
    Ok(())
}
