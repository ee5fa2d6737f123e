//! Finite-field group parameters
//!
//! Every key exchange runs in the multiplicative group modulo a fixed prime.
//! Parameters are an explicit value handed to each call so tests can swap in
//! a small group.

use crate::error::{Error, Result};
use num_bigint::BigUint;
use num_traits::One;

/// 1024-bit MODP prime shared by every dhlink endpoint (big-endian)
const MODP_1024: [u8; 128] = [
    0xcc, 0x81, 0xea, 0x81, 0x57, 0x35, 0x2a, 0x9e, 0x9a, 0x31, 0x8a, 0xac,
    0x4e, 0x33, 0xff, 0xba, 0x80, 0xfc, 0x8d, 0xa3, 0x37, 0x3f, 0xb4, 0x48,
    0x95, 0x10, 0x9e, 0x4c, 0x3f, 0xf6, 0xce, 0xdc, 0xc5, 0x5c, 0x02, 0x22,
    0x8f, 0xcc, 0xbd, 0x55, 0x1a, 0x50, 0x4f, 0xeb, 0x43, 0x46, 0xd2, 0xae,
    0xf4, 0x70, 0x53, 0x31, 0x1c, 0xea, 0xba, 0x95, 0xf6, 0xc5, 0x40, 0xb9,
    0x67, 0xb9, 0x40, 0x9e, 0x9f, 0x05, 0x02, 0xe5, 0x98, 0xcf, 0xc7, 0x13,
    0x27, 0xc5, 0xa4, 0x55, 0xe2, 0xe8, 0x07, 0xbe, 0xde, 0x1e, 0x0b, 0x7d,
    0x23, 0xfb, 0xea, 0x05, 0x4b, 0x95, 0x1c, 0xa9, 0x64, 0xea, 0xec, 0xae,
    0x7b, 0xa8, 0x42, 0xba, 0x1f, 0xc6, 0x81, 0x8c, 0x45, 0x3b, 0xf1, 0x9e,
    0xb9, 0xc5, 0xc8, 0x6e, 0x72, 0x3e, 0x69, 0xa2, 0x10, 0xd4, 0xb7, 0x25,
    0x61, 0xca, 0xb9, 0x7b, 0x3f, 0xb3, 0x06, 0x0b,
];

/// Default generator
const GENERATOR: u32 = 2;

/// Modulus and generator of the key-exchange group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupParams {
    modulus: BigUint,
    generator: BigUint,
}

impl GroupParams {
    /// Build parameters from an arbitrary modulus and generator.
    ///
    /// The modulus is not tested for primality; only the shape of the
    /// values is checked (`p > 3`, `1 < g < p-1`).
    pub fn new(modulus: BigUint, generator: BigUint) -> Result<Self> {
        if modulus <= BigUint::from(3u32) {
            return Err(Error::InvalidParams("modulus must be greater than 3".into()));
        }
        let p_minus_one = &modulus - BigUint::one();
        if generator <= BigUint::one() || generator >= p_minus_one {
            return Err(Error::InvalidParams(
                "generator must lie strictly between 1 and p-1".into(),
            ));
        }
        Ok(Self { modulus, generator })
    }

    /// The fixed 1024-bit group with generator 2
    pub fn standard() -> Self {
        Self {
            modulus: BigUint::from_bytes_be(&MODP_1024),
            generator: BigUint::from(GENERATOR),
        }
    }

    /// Group modulus `p`
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// Group generator `g`
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Byte length of the modulus; shared secrets are padded to this width
    pub fn modulus_len(&self) -> usize {
        ((self.modulus.bits() + 7) / 8) as usize
    }

    /// Whether `value` is an acceptable peer public value (`1 < y < p-1`)
    pub fn is_valid_public(&self, value: &BigUint) -> bool {
        let p_minus_one = &self.modulus - BigUint::one();
        value > &BigUint::one() && value < &p_minus_one
    }
}

impl Default for GroupParams {
    fn default() -> Self {
        Self::standard()
    }
}
