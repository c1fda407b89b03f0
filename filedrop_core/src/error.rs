use thiserror::Error;

/// Failure of a single connection's pipeline.
///
/// Every variant is local to one connection: the server logs it and keeps
/// accepting, the sender returns it to the caller.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("peer disconnected prematurely while reading {field}")]
    Disconnected { field: &'static str },

    #[error("authentication failed, check your username and password")]
    AuthRejected,

    #[error("{field} too long ({len} bytes, max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} is not valid UTF-8")]
    InvalidField { field: &'static str },

    #[error("server did not acknowledge the transfer (got {received:?})")]
    AckMismatch { received: String },

    #[error("timed out during {phase}")]
    Timeout { phase: &'static str },

    #[error("handshake out of order: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{} is not a regular file", path.display())]
    NotAFile { path: std::path::PathBuf },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("credential store error: {0}")]
    Credentials(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// True for failures caused by the peer going away rather than by
    /// protocol or local errors.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransferError::Disconnected { .. } => true,
            TransferError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl From<rustls::Error> for TransferError {
    fn from(e: rustls::Error) -> Self {
        TransferError::Tls(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
