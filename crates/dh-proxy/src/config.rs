//! Configuration for dh-proxy

use crate::relay::RelaySettings;
use clap::Parser;
use dhlink_core::Kdf;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default capture log for client-to-server plaintext
pub const DEFAULT_CLIENT_LOG: &str = "intercepted_by_proxy.txt";

/// Default capture log for server-to-client plaintext
pub const DEFAULT_SERVER_LOG: &str = "intercepted_from_server.txt";

/// dh-proxy - Diffie-Hellman intercepting relay
#[derive(Parser, Debug, Clone)]
#[command(name = "dh-proxy")]
#[command(author, version, about = "Diffie-Hellman MITM proxy", long_about = None)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long)]
    pub listen: u16,

    /// Real server IP address or host name
    pub server_host: String,

    /// Real server port
    pub server_port: u16,

    /// Local address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Close a relay after this many seconds without a forwarded frame
    #[arg(long, default_value = "10")]
    pub idle_timeout_secs: u64,

    /// Socket read/write timeout once relaying (seconds)
    #[arg(long, default_value = "10")]
    pub read_timeout_secs: u64,

    /// How long to wait for the client's public value (seconds)
    #[arg(long, default_value = "30")]
    pub handshake_timeout_secs: u64,

    /// Timeout for connecting to the real server (seconds)
    #[arg(long, default_value = "10")]
    pub connect_timeout_secs: u64,

    /// Close a relay after forwarding this many frames
    #[arg(long)]
    pub max_messages: Option<u64>,

    /// Session key derivation (hkdf or hex-sha256)
    #[arg(long, default_value = "hkdf")]
    pub kdf: Kdf,

    /// Token rewritten in client-to-server messages
    #[arg(long, default_value = "transfer")]
    pub replace_from: String,

    /// Replacement token
    #[arg(long, default_value = "hacked")]
    pub replace_to: String,

    /// Capture log for client-to-server plaintext
    #[arg(long, default_value = DEFAULT_CLIENT_LOG)]
    pub client_log: PathBuf,

    /// Capture log for server-to-client plaintext
    #[arg(long, default_value = DEFAULT_SERVER_LOG)]
    pub server_log: PathBuf,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("Real server port cannot be 0");
        }
        if self.idle_timeout_secs == 0
            || self.read_timeout_secs == 0
            || self.handshake_timeout_secs == 0
            || self.connect_timeout_secs == 0
        {
            anyhow::bail!("Timeouts must be at least one second");
        }
        if self.replace_from.is_empty() {
            anyhow::bail!("Replacement token cannot be empty");
        }
        if self.max_messages == Some(0) {
            anyhow::bail!("--max-messages must be positive");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        Ok(())
    }

    /// Address the acceptor binds
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.listen)
    }

    /// `host:port` of the real server
    pub fn upstream(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-connection relay settings
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            io_timeout: Duration::from_secs(self.read_timeout_secs),
            max_messages: self.max_messages,
        }
    }
}
