//! Stream-level wire helpers
//!
//! A link starts with a raw exchange of fixed-width public values and then
//! carries frames. Reads here are plain blocking reads on an async stream;
//! callers bound them with `tokio::time::timeout`.

use crate::framing::{self, FrameError, LENGTH_PREFIX_LEN};
use dhlink_core::{decode_public_value, encode_public_value, SessionKey, PUBLIC_VALUE_WIDTH};
use num_bigint::BigUint;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Public value exchange errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed during key reception ({received} of {PUBLIC_VALUE_WIDTH} bytes)")]
    Truncated { received: usize },
    #[error("Key exchange error: {0}")]
    KeyExchange(#[from] dhlink_core::Error),
}

/// Read into `buf` until it is full or the stream ends; returns bytes read
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Send our public value as exactly 384 decimal digits
pub async fn write_public_value<W>(writer: &mut W, value: &BigUint) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let text = encode_public_value(value)?;
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a peer public value (exactly 384 bytes, then parse)
pub async fn read_public_value<R>(reader: &mut R) -> Result<BigUint, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; PUBLIC_VALUE_WIDTH];
    let received = fill(reader, &mut buf).await?;
    if received < PUBLIC_VALUE_WIDTH {
        return Err(WireError::Truncated { received });
    }
    trace!("Received public value ({} bytes)", received);
    Ok(decode_public_value(&buf)?)
}

/// Read one frame body (`nonce || ciphertext`).
///
/// Returns `Ok(None)` when the stream ends cleanly before the length prefix.
/// A stream that ends inside the prefix or the body is a truncation error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let received = fill(reader, &mut prefix).await?;
    if received == 0 {
        return Ok(None);
    }
    if received < LENGTH_PREFIX_LEN {
        return Err(FrameError::Truncated {
            expected: LENGTH_PREFIX_LEN,
            received,
        });
    }

    let length = u16::from_be_bytes(prefix) as usize;
    let mut body = vec![0u8; length];
    let received = fill(reader, &mut body).await?;
    if received < length {
        return Err(FrameError::Truncated {
            expected: length,
            received,
        });
    }
    Ok(Some(body))
}

/// Write a complete encoded frame
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Encrypt `plaintext` under `key` and write it as one frame
pub async fn send_sealed<W>(writer: &mut W, plaintext: &[u8], key: &SessionKey) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = framing::encode(plaintext, key)?;
    write_frame(writer, &frame).await
}
