//! Error types for dhlink key exchange

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Key exchange error types
#[derive(Debug, Error)]
pub enum Error {
    /// Public value does not fit the fixed-width decimal encoding
    #[error("public value has {digits} decimal digits (max {width})")]
    EncodingOverflow { digits: usize, width: usize },

    /// Public value text is not a fixed-width decimal number
    #[error("malformed public value: {0}")]
    MalformedPublicValue(String),

    /// Public value is outside (1, p-1)
    #[error("public value out of range for the group")]
    PublicValueOutOfRange,

    /// Group parameters rejected at construction
    #[error("invalid group parameters: {0}")]
    InvalidParams(String),

    /// HKDF expansion failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Unrecognised key derivation strategy name
    #[error("unknown key derivation strategy: {0} (expected hkdf or hex-sha256)")]
    UnknownKdf(String),
}
