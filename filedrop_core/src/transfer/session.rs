use crate::error::{Result, TransferError};
use std::fmt;
use std::net::SocketAddr;

/// Handshake progress of one connection, shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connected,
    TlsEstablished,
    NonceExchanged,
    CredentialsExchanged,
    Authenticated,
    Rejected,
}

impl HandshakeState {
    pub fn name(self) -> &'static str {
        match self {
            HandshakeState::Connected => "Connected",
            HandshakeState::TlsEstablished => "TlsEstablished",
            HandshakeState::NonceExchanged => "NonceExchanged",
            HandshakeState::CredentialsExchanged => "CredentialsExchanged",
            HandshakeState::Authenticated => "Authenticated",
            HandshakeState::Rejected => "Rejected",
        }
    }

    fn predecessor(self) -> Option<HandshakeState> {
        match self {
            HandshakeState::Connected => None,
            HandshakeState::TlsEstablished => Some(HandshakeState::Connected),
            HandshakeState::NonceExchanged => Some(HandshakeState::TlsEstablished),
            HandshakeState::CredentialsExchanged => Some(HandshakeState::NonceExchanged),
            HandshakeState::Authenticated | HandshakeState::Rejected => {
                Some(HandshakeState::CredentialsExchanged)
            }
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-connection state. Owned by the connection's task and dropped with it.
#[derive(Debug)]
pub struct Session {
    peer: SocketAddr,
    state: HandshakeState,
    nonce: Option<[u8; 32]>,
    username: Option<String>,
    bytes_transferred: u64,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: HandshakeState::Connected,
            nonce: None,
            username: None,
            bytes_transferred: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn nonce(&self) -> Option<&[u8; 32]> {
        self.nonce.as_ref()
    }

    /// Claimed username, set once the credentials block has been read.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == HandshakeState::Authenticated
    }

    /// Move to `next`, which must directly follow the current state.
    pub fn advance(&mut self, next: HandshakeState) -> Result<()> {
        if next.predecessor() != Some(self.state) {
            return Err(TransferError::InvalidState {
                expected: next.predecessor().map_or("none", HandshakeState::name),
                actual: self.state.name(),
            });
        }
        tracing::debug!("{}: {} -> {}", self.peer, self.state, next);
        self.state = next;
        Ok(())
    }

    pub(crate) fn set_nonce(&mut self, nonce: [u8; 32]) {
        self.nonce = Some(nonce);
    }

    pub(crate) fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }

    pub(crate) fn add_bytes(&mut self, n: u64) {
        self.bytes_transferred += n;
    }

    /// Fail unless the handshake reached `Authenticated`.
    pub fn require_authenticated(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(TransferError::InvalidState {
                expected: HandshakeState::Authenticated.name(),
                actual: self.state.name(),
            })
        }
    }
}
