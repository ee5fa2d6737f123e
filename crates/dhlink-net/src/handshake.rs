//! Two-party public value exchange
//!
//! The listening side speaks first; the connecting side reads the listener's
//! value before sending its own.

use crate::wire::{read_public_value, write_public_value, WireError};
use dhlink_core::{GroupParams, Kdf, KeyPair, SessionKey};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Run the exchange as the accepting endpoint: send, then receive
pub async fn exchange_as_server<S>(
    stream: &mut S,
    params: &GroupParams,
    kdf: Kdf,
) -> Result<SessionKey, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let keypair = KeyPair::generate(params);
    write_public_value(stream, keypair.public_value()).await?;
    let peer = read_public_value(stream).await?;

    let key = keypair.session_key(&peer, params, kdf)?;
    debug!("Derived session key {}", key.fingerprint());
    Ok(key)
}

/// Run the exchange as the connecting endpoint: receive, then send
pub async fn exchange_as_client<S>(
    stream: &mut S,
    params: &GroupParams,
    kdf: Kdf,
) -> Result<SessionKey, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = read_public_value(stream).await?;
    let keypair = KeyPair::generate(params);
    write_public_value(stream, keypair.public_value()).await?;

    let key = keypair.session_key(&peer, params, kdf)?;
    debug!("Derived session key {}", key.fingerprint());
    Ok(key)
}
