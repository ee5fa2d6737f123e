//! Interception handshake
//!
//! The proxy answers the real server as if it were the client and the
//! client as if it were the server, ending up with two unrelated session
//! keys. Ordering:
//! 1. read the server's public value
//! 2. send our client-facing public value to the client
//! 3. read the client's public value (bounded by the handshake timeout)
//! 4. send our server-facing public value to the server
//! 5. derive both keys

use dhlink_core::{GroupParams, Kdf, KeyPair, SessionKey};
use dhlink_net::wire::{read_public_value, write_public_value, WireError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, info};

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Server link: {0}")]
    Server(#[source] WireError),
    #[error("Client link: {0}")]
    Client(#[source] WireError),
    #[error("Key exchange error: {0}")]
    KeyExchange(#[from] dhlink_core::Error),
    #[error("Timed out waiting for the {stage} public value after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
}

/// Session keys for the two links of one proxied connection
#[derive(Debug)]
pub struct LinkKeys {
    /// Key shared with the connecting client
    pub client: SessionKey,
    /// Key shared with the real server
    pub server: SessionKey,
}

/// Timeouts and key-exchange parameters for one handshake
#[derive(Clone, Debug)]
pub struct HandshakeSettings {
    pub params: GroupParams,
    pub kdf: Kdf,
    /// Wait for the real server's public value
    pub server_wait: Duration,
    /// Wait for the client's public value
    pub client_wait: Duration,
}

/// Run both key exchanges in interception order
pub async fn intercept_handshake<C, S>(
    client: &mut C,
    server: &mut S,
    settings: &HandshakeSettings,
) -> Result<LinkKeys, HandshakeError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let params = &settings.params;

    let server_public = timeout(settings.server_wait, read_public_value(server))
        .await
        .map_err(|_| HandshakeError::Timeout {
            stage: "server",
            secs: settings.server_wait.as_secs(),
        })?
        .map_err(HandshakeError::Server)?;
    debug!("Received server public value");

    let client_facing = KeyPair::generate(params);
    write_public_value(client, client_facing.public_value())
        .await
        .map_err(HandshakeError::Client)?;
    debug!("Sent proxy public value to client");

    let client_public = timeout(settings.client_wait, read_public_value(client))
        .await
        .map_err(|_| HandshakeError::Timeout {
            stage: "client",
            secs: settings.client_wait.as_secs(),
        })?
        .map_err(HandshakeError::Client)?;
    debug!("Received client public value");

    let server_facing = KeyPair::generate(params);
    write_public_value(server, server_facing.public_value())
        .await
        .map_err(HandshakeError::Server)?;
    debug!("Sent proxy public value to server");

    let keys = LinkKeys {
        client: client_facing.session_key(&client_public, params, settings.kdf)?,
        server: server_facing.session_key(&server_public, params, settings.kdf)?,
    };
    info!("Session keys established with both endpoints");
    debug!(
        "Key fingerprints: client {}, server {}",
        keys.client.fingerprint(),
        keys.server.fingerprint()
    );
    Ok(keys)
}
