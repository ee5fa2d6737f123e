//! eft-dh - encrypted single-message transfer over dhlink
//!
//! A server accepts one connection, runs the key exchange (speaking first),
//! receives exactly one encrypted frame and writes the plaintext to disk.
//! A client connects, runs the exchange and sends its payload as one frame.

pub mod config;
pub mod endpoint;

pub use config::{Config, Mode};
pub use endpoint::{receive_one, send_one, EndpointError, TransferSettings};
