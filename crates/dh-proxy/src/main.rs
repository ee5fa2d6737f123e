//! dh-proxy - Diffie-Hellman intercepting relay
//!
//! Sits between a dhlink client and its real server, runs a separate key
//! exchange with each, and relays (and rewrites) the decrypted traffic.

use clap::Parser;
use dh_proxy::config::Config;
use dh_proxy::server::Server;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env()
        .add_directive("dh_proxy=info".parse().unwrap())
        .add_directive("dhlink_net=info".parse().unwrap());
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "dh-proxy v{} - Diffie-Hellman MITM proxy (kdf: {})",
        env!("CARGO_PKG_VERSION"),
        config.kdf
    );

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Fatal error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown.trigger();
    });

    match server.run().await {
        Ok(stats) => {
            info!(
                "Final stats: {} accepted, {} relayed, {} failed, {} messages forwarded",
                stats.accepted, stats.relayed, stats.failed, stats.messages_forwarded
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
