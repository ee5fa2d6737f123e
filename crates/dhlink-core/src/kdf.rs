//! Session key derivation
//!
//! Two strategies turn a shared secret into a 32-byte session key. They are
//! not wire-compatible with each other; both ends of a link must agree.

use crate::error::{Error, Result};
use crate::params::GroupParams;
use hkdf::Hkdf;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Session key length in bytes
pub const SESSION_KEY_LEN: usize = 32;

/// HKDF info label; fixed and connection-independent
pub const HKDF_INFO: &[u8] = b"dh-session-key";

/// Key derivation strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Kdf {
    /// HKDF-SHA256 (no salt, info [`HKDF_INFO`]) over the big-endian shared
    /// secret, left-padded to the modulus length
    #[default]
    Hkdf,
    /// SHA-256 over the lowercase, unpadded hex text of the shared secret
    HexSha256,
}

impl Kdf {
    /// Derive a session key from a shared secret
    pub fn derive(self, shared: &BigUint, params: &GroupParams) -> Result<SessionKey> {
        let mut key = [0u8; SESSION_KEY_LEN];
        match self {
            Kdf::Hkdf => {
                let ikm = padded_be_bytes(shared, params.modulus_len());
                let hkdf = Hkdf::<Sha256>::new(None, &ikm);
                hkdf.expand(HKDF_INFO, &mut key)
                    .map_err(|_| Error::KeyDerivation)?;
            }
            Kdf::HexSha256 => {
                let text = format!("{:x}", shared);
                key.copy_from_slice(&Sha256::digest(text.as_bytes()));
            }
        }
        Ok(SessionKey(key))
    }
}

impl FromStr for Kdf {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hkdf" => Ok(Kdf::Hkdf),
            "hex-sha256" | "hex" => Ok(Kdf::HexSha256),
            other => Err(Error::UnknownKdf(other.to_string())),
        }
    }
}

impl fmt::Display for Kdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kdf::Hkdf => write!(f, "hkdf"),
            Kdf::HexSha256 => write!(f, "hex-sha256"),
        }
    }
}

/// Big-endian bytes of `value`, left-padded with zeros to `width`
fn padded_be_bytes(value: &BigUint, width: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    if raw.len() >= width {
        return raw;
    }
    let mut out = vec![0u8; width - raw.len()];
    out.extend_from_slice(&raw);
    out
}

/// 32-byte symmetric key for one link
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    /// Short hex fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({}..)", self.fingerprint())
    }
}
