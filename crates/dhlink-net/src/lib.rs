//! Networking primitives for dhlink
//!
//! This crate provides:
//! - Length-prefixed, nonce-prefixed AES-GCM frames
//! - A `tokio-util` codec carrying plaintext over those frames
//! - Async helpers for the fixed-width public value exchange and
//!   two-phase frame reads
//! - Endpoint-side key exchange (listener speaks first)

pub mod framing;
pub mod handshake;
pub mod wire;

pub use framing::{decode, encode, FrameCodec, FrameError, MAX_PLAINTEXT_LEN, NONCE_LEN};
pub use handshake::{exchange_as_client, exchange_as_server};
pub use wire::{read_frame, read_public_value, send_sealed, write_frame, write_public_value, WireError};
