//! Configuration for eft-dh

use crate::endpoint::TransferSettings;
use clap::Parser;
use dhlink_core::{GroupParams, Kdf};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// eft-dh - DH file transfer
#[derive(Parser, Debug, Clone)]
#[command(name = "eft-dh")]
#[command(about = "DH File Transfer")]
pub struct Config {
    /// Run as server listening on PORT
    #[arg(short, long, value_name = "PORT")]
    pub listen: Option<u16>,

    /// Server IP to connect to
    pub server_ip: Option<String>,

    /// Port number
    pub port: Option<u16>,

    /// Where the server writes the decrypted payload
    #[arg(long, default_value = "decrypted_output.txt")]
    pub output: PathBuf,

    /// Timeout for accept, connect and each read (seconds)
    #[arg(long, default_value = "60")]
    pub timeout_secs: u64,

    /// Session key derivation (hkdf or hex-sha256).
    ///
    /// The default matches dh-proxy. Peers running the legacy endpoint derive
    /// keys with SHA-256 over the hex secret and need `--kdf hex-sha256`.
    #[arg(long, default_value = "hkdf")]
    pub kdf: Kdf,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

/// What the process should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Receive one payload on this address
    Server { listen: SocketAddr },
    /// Send stdin to `host:port`
    Client { server: String },
}

impl Config {
    /// Resolve the run mode from the flags
    pub fn mode(&self) -> anyhow::Result<Mode> {
        if let Some(port) = self.listen {
            return Ok(Mode::Server {
                listen: SocketAddr::from(([0, 0, 0, 0], port)),
            });
        }
        match (&self.server_ip, self.port) {
            (Some(ip), Some(port)) => Ok(Mode::Client {
                server: format!("{}:{}", ip, port),
            }),
            _ => anyhow::bail!("Client mode requires SERVER_IP_ADDRESS and PORT"),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_secs == 0 {
            anyhow::bail!("Timeout must be at least one second");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        self.mode().map(|_| ())
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            params: GroupParams::standard(),
            kdf: self.kdf,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
