//! dh-proxy - Diffie-Hellman intercepting relay
//!
//! This crate provides:
//! - A per-connection handshake that runs one key exchange with the client
//!   and an independent one with the real server
//! - A relay loop that decrypts, rewrites and re-encrypts frames between
//!   the two links
//! - Append-only capture logs of every decrypted message
//! - The TCP acceptor that ties them together

pub mod capture;
pub mod config;
pub mod handshake;
pub mod intercept;
pub mod relay;
pub mod server;

pub use capture::{CaptureLog, CaptureLogs};
pub use config::Config;
pub use handshake::{intercept_handshake, HandshakeSettings, LinkKeys};
pub use intercept::{Passthrough, ReplaceToken, Transform};
pub use relay::{CloseReason, RelayOutcome, RelaySession, RelaySettings};
pub use server::{ProxyStats, Server, ShutdownHandle};
