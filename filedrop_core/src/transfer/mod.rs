//! Authenticated file transfer over TLS on TCP.
//!
//! This module provides:
//! - Fixed-width framing of the protocol fields
//! - Nonce / HMAC challenge-response authentication
//! - The payload stream and its completion token
//! - A receiving server and a sending client

pub mod constants;
pub mod handshake;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod session;
pub mod tls;
pub mod utils;

// Re-export public API
pub use constants::TRANSFER_PORT;
pub use handshake::ClientCredentials;
pub use receiver::ReceivedFile;
pub use sender::{FileSender, SendItem, SendReport};
pub use server::{ServerOptions, TransferServer};
pub use session::{HandshakeState, Session};
