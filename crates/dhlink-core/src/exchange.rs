//! Ephemeral Diffie-Hellman key exchange
//!
//! Public values travel as exactly [`PUBLIC_VALUE_WIDTH`] ASCII decimal
//! digits, left-padded with zeros. Exchanged values are not authenticated.

use crate::error::{Error, Result};
use crate::kdf::{Kdf, SessionKey};
use crate::params::GroupParams;
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::OsRng;
use std::fmt;

/// Width of the decimal public value encoding
pub const PUBLIC_VALUE_WIDTH: usize = 384;

/// Ephemeral key pair for one link
pub struct KeyPair {
    private_exponent: BigUint,
    public_value: BigUint,
}

impl KeyPair {
    /// Generate a fresh key pair with the OS CSPRNG.
    ///
    /// The private exponent is uniform in `[2, p-2]`.
    pub fn generate(params: &GroupParams) -> Self {
        let low = BigUint::from(2u32);
        let high = params.modulus() - BigUint::one();
        let private_exponent = OsRng.gen_biguint_range(&low, &high);
        let public_value = params.generator().modpow(&private_exponent, params.modulus());
        Self {
            private_exponent,
            public_value,
        }
    }

    /// Our public value `g^x mod p`
    pub fn public_value(&self) -> &BigUint {
        &self.public_value
    }

    /// Our public value in transport encoding
    pub fn encoded_public(&self) -> Result<String> {
        encode_public_value(&self.public_value)
    }

    /// Compute `peer^x mod p` after range-checking the peer value
    pub fn shared_secret(&self, peer_public: &BigUint, params: &GroupParams) -> Result<BigUint> {
        if !params.is_valid_public(peer_public) {
            return Err(Error::PublicValueOutOfRange);
        }
        Ok(peer_public.modpow(&self.private_exponent, params.modulus()))
    }

    /// Derive the link's session key from the peer's public value
    pub fn session_key(
        &self,
        peer_public: &BigUint,
        params: &GroupParams,
        kdf: Kdf,
    ) -> Result<SessionKey> {
        let shared = self.shared_secret(peer_public, params)?;
        kdf.derive(&shared, params)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_value", &self.public_value)
            .finish_non_exhaustive()
    }
}

/// Generate an ephemeral key pair for `params`
pub fn generate_keypair(params: &GroupParams) -> KeyPair {
    KeyPair::generate(params)
}

/// Render `value` as exactly [`PUBLIC_VALUE_WIDTH`] zero-padded decimal digits
pub fn encode_public_value(value: &BigUint) -> Result<String> {
    let digits = value.to_str_radix(10);
    if digits.len() > PUBLIC_VALUE_WIDTH {
        return Err(Error::EncodingOverflow {
            digits: digits.len(),
            width: PUBLIC_VALUE_WIDTH,
        });
    }
    Ok(format!("{:0>width$}", digits, width = PUBLIC_VALUE_WIDTH))
}

/// Parse a fixed-width decimal public value
pub fn decode_public_value(text: &[u8]) -> Result<BigUint> {
    if text.len() != PUBLIC_VALUE_WIDTH {
        return Err(Error::MalformedPublicValue(format!(
            "expected {} bytes, got {}",
            PUBLIC_VALUE_WIDTH,
            text.len()
        )));
    }
    if let Some(pos) = text.iter().position(|b| !b.is_ascii_digit()) {
        return Err(Error::MalformedPublicValue(format!(
            "non-digit byte 0x{:02x} at offset {}",
            text[pos], pos
        )));
    }
    BigUint::parse_bytes(text, 10)
        .ok_or_else(|| Error::MalformedPublicValue("not a decimal integer".into()))
}

/// Derive the session key shared with the owner of `peer_public`
pub fn derive_shared_key(
    keypair: &KeyPair,
    peer_public: &BigUint,
    params: &GroupParams,
    kdf: Kdf,
) -> Result<SessionKey> {
    keypair.session_key(peer_public, params, kdf)
}
