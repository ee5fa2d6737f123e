//! One-shot transfer endpoints
//!
//! Both sides move plaintext through `Framed<TcpStream, FrameCodec>` once the
//! key exchange is done. Every blocking step is bounded by the same timeout.

use dhlink_core::{GroupParams, Kdf};
use dhlink_net::{
    exchange_as_client, exchange_as_server, FrameCodec, FrameError, WireError, MAX_PLAINTEXT_LEN,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// Endpoint errors
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Key exchange failed: {0}")]
    Exchange(#[from] WireError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Timed out during {stage} after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
    #[error("Peer closed the connection before sending a frame")]
    NoFrame,
    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Key-exchange parameters and the per-step timeout
#[derive(Clone, Debug)]
pub struct TransferSettings {
    pub params: GroupParams,
    pub kdf: Kdf,
    pub timeout: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            params: GroupParams::standard(),
            kdf: Kdf::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl TransferSettings {
    async fn bounded<F, T>(&self, stage: &'static str, fut: F) -> Result<T, EndpointError>
    where
        F: std::future::Future<Output = T>,
    {
        timeout(self.timeout, fut)
            .await
            .map_err(|_| EndpointError::Timeout {
                stage,
                secs: self.timeout.as_secs(),
            })
    }
}

/// Accept one connection, receive one frame and write its plaintext to
/// `output`, replacing any existing file. Returns the plaintext length.
pub async fn receive_one(
    listener: TcpListener,
    output: &Path,
    settings: &TransferSettings,
) -> Result<usize, EndpointError> {
    let (mut stream, peer) = settings.bounded("accept", listener.accept()).await??;
    info!("Connection from {}", peer);

    let key = settings
        .bounded("key exchange", exchange_as_server(&mut stream, &settings.params, settings.kdf))
        .await??;
    debug!("Session key established ({})", key.fingerprint());

    let mut framed = Framed::new(stream, FrameCodec::new(key));
    let plaintext = settings
        .bounded("receive", framed.next())
        .await?
        .ok_or(EndpointError::NoFrame)??;
    debug!("Decrypted {} bytes", plaintext.len());

    write_output(output, &plaintext).await?;
    info!("Wrote {} bytes to {}", plaintext.len(), output.display());
    Ok(plaintext.len())
}

/// Connect to `server`, run the exchange and send `payload` as one frame
pub async fn send_one(
    server: &str,
    payload: &[u8],
    settings: &TransferSettings,
) -> Result<SocketAddr, EndpointError> {
    if payload.len() > MAX_PLAINTEXT_LEN {
        return Err(FrameError::PayloadTooLarge(payload.len()).into());
    }

    let mut stream = settings.bounded("connect", TcpStream::connect(server)).await??;
    let peer = stream.peer_addr()?;
    info!("Connected to {}", peer);

    let key = settings
        .bounded("key exchange", exchange_as_client(&mut stream, &settings.params, settings.kdf))
        .await??;
    debug!("Session key established ({})", key.fingerprint());

    let mut framed = Framed::new(stream, FrameCodec::new(key));
    settings.bounded("send", framed.send(payload.to_vec())).await??;
    settings
        .bounded("close", SinkExt::<Vec<u8>>::close(&mut framed))
        .await??;
    info!("Sent {} bytes", payload.len());
    Ok(peer)
}

async fn write_output(path: &Path, data: &[u8]) -> Result<(), EndpointError> {
    let wrap = |source: std::io::Error| EndpointError::Output {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(path).await.map_err(wrap)?;
    file.write_all(data).await.map_err(wrap)?;
    file.flush().await.map_err(wrap)?;
    file.sync_all().await.map_err(wrap)?;
    Ok(())
}
