//! dh-proxy server - connection acceptor
//!
//! Accepts client connections and spawns one task per connection. Each task
//! connects to the real server, runs the interception handshake and then the
//! relay loop. A failure in one task never reaches the accept loop.

use crate::capture::{CaptureError, CaptureLogs};
use crate::config::Config;
use crate::handshake::{intercept_handshake, HandshakeError, HandshakeSettings};
use crate::intercept::{ReplaceToken, Transform};
use crate::relay::{RelayError, RelayOutcome, RelaySession, RelaySettings};
use dhlink_core::GroupParams;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
}

/// Errors ending a single proxied connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to real server {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("Timed out connecting to real server {addr}")]
    ConnectTimeout { addr: String },
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Relay failed: {0}")]
    Relay(#[from] RelayError),
}

/// Acceptor statistics
#[derive(Debug, Clone, Default)]
pub struct ProxyStats {
    /// Connections accepted
    pub accepted: u64,
    /// Connections whose relay ended without error
    pub relayed: u64,
    /// Connections that failed during connect, handshake or relay
    pub failed: u64,
    /// Frames forwarded across all finished relays
    pub messages_forwarded: u64,
}

/// Everything a connection task needs; shared read-only across tasks
struct ConnectionContext {
    upstream: String,
    connect_timeout: Duration,
    handshake: HandshakeSettings,
    relay: RelaySettings,
    transform: Arc<dyn Transform>,
    capture: Arc<CaptureLogs>,
    stats: Arc<RwLock<ProxyStats>>,
}

/// Stops the accept loop when triggered
#[derive(Clone)]
pub struct ShutdownHandle(broadcast::Sender<()>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.0.send(());
    }
}

/// Bound acceptor, ready to run
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    upstream: String,
    connect_timeout: Duration,
    handshake: HandshakeSettings,
    relay: RelaySettings,
    transform: Arc<dyn Transform>,
    capture: Arc<CaptureLogs>,
    stats: Arc<RwLock<ProxyStats>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Open the capture logs and bind the listening socket
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let capture = Arc::new(CaptureLogs::open(&config.client_log, &config.server_log)?);

        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;

        let handshake = HandshakeSettings {
            params: GroupParams::standard(),
            kdf: config.kdf,
            server_wait: Duration::from_secs(config.read_timeout_secs),
            client_wait: config.handshake_timeout(),
        };
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            local_addr,
            upstream: config.upstream(),
            connect_timeout: config.connect_timeout(),
            handshake,
            relay: config.relay_settings(),
            transform: Arc::new(ReplaceToken::new(
                config.replace_from.as_bytes(),
                config.replace_to.as_bytes(),
            )),
            capture,
            stats: Arc::new(RwLock::new(ProxyStats::default())),
            shutdown_tx,
        })
    }

    /// Replace the interception transform
    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = transform;
        self
    }

    /// Use different group parameters (both links)
    pub fn with_group_params(mut self, params: GroupParams) -> Self {
        self.handshake.params = params;
        self
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Current statistics
    pub fn stats(&self) -> ProxyStats {
        self.stats.read().clone()
    }

    /// Accept connections until shutdown; returns the final statistics.
    ///
    /// In-flight connections are not drained.
    pub async fn run(self) -> Result<ProxyStats, ServerError> {
        info!(
            "dh-proxy listening on {} (real server {})",
            self.local_addr, self.upstream
        );

        let ctx = Arc::new(ConnectionContext {
            upstream: self.upstream,
            connect_timeout: self.connect_timeout,
            handshake: self.handshake,
            relay: self.relay,
            transform: self.transform,
            capture: self.capture,
            stats: self.stats.clone(),
        });
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("Accepted connection from {}", addr);
                            self.stats.write().accepted += 1;
                            let ctx = ctx.clone();
                            let span = tracing::info_span!("conn", peer = %addr);
                            tokio::spawn(
                                async move {
                                    ctx.finish(handle_connection(&ctx, stream).await);
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutting down...");
                    break;
                }
            }
        }

        let stats = self.stats.read().clone();
        Ok(stats)
    }
}

impl ConnectionContext {
    /// Record how a connection ended
    fn finish(&self, result: Result<RelayOutcome, ConnectionError>) {
        let mut stats = self.stats.write();
        match result {
            Ok(outcome) => {
                info!(
                    "Relay closed ({:?}) after {} messages",
                    outcome.reason, outcome.messages_forwarded
                );
                stats.relayed += 1;
                stats.messages_forwarded += outcome.messages_forwarded;
            }
            Err(e) => {
                warn!("Connection error: {}", e);
                stats.failed += 1;
            }
        }
    }
}

/// Connect upstream, intercept the handshake, relay.
///
/// Both sockets are dropped (closed) on every exit path.
async fn handle_connection(
    ctx: &ConnectionContext,
    mut client: TcpStream,
) -> Result<RelayOutcome, ConnectionError> {
    let mut server = timeout(ctx.connect_timeout, TcpStream::connect(&ctx.upstream))
        .await
        .map_err(|_| ConnectionError::ConnectTimeout {
            addr: ctx.upstream.clone(),
        })?
        .map_err(|source| ConnectionError::Connect {
            addr: ctx.upstream.clone(),
            source,
        })?;
    info!("Connected to real server {}", ctx.upstream);

    let keys = intercept_handshake(&mut client, &mut server, &ctx.handshake).await?;

    debug!("Entering bidirectional relay loop");
    let session = RelaySession::new(
        client,
        server,
        keys,
        ctx.transform.clone(),
        ctx.capture.clone(),
        ctx.relay.clone(),
    );
    Ok(session.run().await?)
}
