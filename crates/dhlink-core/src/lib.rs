//! dhlink core library
//!
//! This crate provides the key-exchange half of the dhlink protocol: fixed
//! finite-field group parameters, ephemeral key pairs, the fixed-width decimal
//! transport encoding of public values, and session key derivation.
//!
//! # Modules
//!
//! - [`params`]: Group parameters (modulus and generator)
//! - [`exchange`]: Key pairs, public value encoding, shared secrets
//! - [`kdf`]: Session key derivation strategies
//! - [`error`]: Error types

pub mod error;
pub mod exchange;
pub mod kdf;
pub mod params;

pub use error::{Error, Result};
pub use exchange::{
    decode_public_value, derive_shared_key, encode_public_value, generate_keypair, KeyPair,
    PUBLIC_VALUE_WIDTH,
};
pub use kdf::{Kdf, SessionKey, SESSION_KEY_LEN};
pub use params::GroupParams;
