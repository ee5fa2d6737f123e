//! Encrypted message framing
//!
//! Wire format of one frame:
//! - 2 bytes: length (big-endian, counts nonce + ciphertext)
//! - 16 bytes: random nonce
//! - N bytes: AES-256-GCM ciphertext including the 16-byte tag

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce};
use bytes::{Buf, BufMut, BytesMut};
use dhlink_core::SessionKey;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// AES-256-GCM with a 16-byte nonce
type FrameCipher = AesGcm<Aes256, U16>;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Size of the per-frame nonce
pub const NONCE_LEN: usize = 16;

/// Size of the GCM authentication tag
pub const TAG_LEN: usize = 16;

/// Largest frame body the length prefix can describe
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Largest plaintext that fits in one frame
pub const MAX_PLAINTEXT_LEN: usize = MAX_BODY_LEN - NONCE_LEN - TAG_LEN;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Payload too large: {0} bytes (max {MAX_PLAINTEXT_LEN})")]
    PayloadTooLarge(usize),
    #[error("Segment too short: {0} bytes (need at least {NONCE_LEN})")]
    TooShort(usize),
    #[error("Frame authentication failed")]
    Authentication,
    #[error("AEAD encryption failed")]
    Encryption,
    #[error("Truncated frame: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn cipher(key: &SessionKey) -> FrameCipher {
    FrameCipher::new(Key::<FrameCipher>::from_slice(key.as_bytes()))
}

/// Encrypt `plaintext` under `key` into a complete wire frame.
///
/// Every call draws a fresh random nonce.
pub fn encode(plaintext: &[u8], key: &SessionKey) -> Result<Vec<u8>, FrameError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(FrameError::PayloadTooLarge(plaintext.len()));
    }

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher(key)
        .encrypt(Nonce::<U16>::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| FrameError::Encryption)?;

    let length = NONCE_LEN + ciphertext.len();
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + length);
    frame.extend_from_slice(&(length as u16).to_be_bytes());
    frame.extend_from_slice(&nonce_bytes);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypt a frame body (`nonce || ciphertext`, the bytes after the length
/// prefix) under `key`
pub fn decode(body: &[u8], key: &SessionKey) -> Result<Vec<u8>, FrameError> {
    if body.len() < NONCE_LEN {
        return Err(FrameError::TooShort(body.len()));
    }

    let (nonce, ciphertext) = body.split_at(NONCE_LEN);
    cipher(key)
        .decrypt(Nonce::<U16>::from_slice(nonce), ciphertext)
        .map_err(|_| FrameError::Authentication)
}

/// Codec carrying plaintext messages over encrypted frames
///
/// Decoding yields decrypted plaintext; a frame that fails authentication
/// is an error.
pub struct FrameCodec {
    key: SessionKey,
}

impl FrameCodec {
    /// Create a codec for one link's session key
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        // Peek at length
        let length = u16::from_be_bytes([src[0], src[1]]) as usize;

        if src.len() < LENGTH_PREFIX_LEN + length {
            src.reserve(LENGTH_PREFIX_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        let body = src.split_to(length);

        decode(&body, &self.key).map(Some)
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode(&item, &self.key)?;
        dst.reserve(frame.len());
        dst.put_slice(&frame);
        Ok(())
    }
}
