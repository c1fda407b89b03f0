use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;

pub mod archive;
pub mod config;
pub mod credentials;
pub mod error;
pub mod storage;
pub mod transfer;

pub use archive::Archive;
pub use credentials::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, PasswordHash, hash_password,
};
pub use error::{Result, TransferError};
pub use storage::{ReceiveDir, ReceivedEntry};
pub use transfer::TRANSFER_PORT;

/// Report from the transfer engine to whoever drives it (CLI, tests)
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Sender: after every buffer written
    Progress {
        file_name: String,
        bytes_sent: u64,
        total_bytes: u64,
        percent: f32,
        speed: String,
    },

    /// Receiver: a peer passed the handshake
    Authenticated { peer: SocketAddr, username: String },

    /// Receiver: a peer failed the handshake
    Rejected {
        peer: SocketAddr,
        username: Option<String>,
    },

    /// Receiver: a file was written and acknowledged
    FileReceived {
        peer: SocketAddr,
        file_name: String,
        path: PathBuf,
        bytes: u64,
    },

    /// Sender: the receiver acknowledged the file
    Completed { file_name: String, bytes: u64 },

    Error {
        peer: Option<SocketAddr>,
        message: String,
    },
}

/// Optional, lossy event channel.
///
/// Events go out with `try_send`; if the receiver lags or is gone the event
/// is dropped and the transfer carries on.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<mpsc::Sender<TransferEvent>>);

impl EventSink {
    pub fn new(tx: mpsc::Sender<TransferEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    /// Bounded channel plus its sink
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.0 {
            if let Err(e) = tx.try_send(event) {
                tracing::trace!("Dropped transfer event: {}", e);
            }
        }
    }
}
