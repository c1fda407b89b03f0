//! Nonce challenge / HMAC response authentication.
//!
//! The receiver issues a fresh 32-byte nonce, the sender answers with its
//! username block and `HMAC-SHA256(nonce)` keyed by its password hash, and the
//! receiver replies `AUTH_OK` or `AUTH_FAIL`. Unknown users and bad proofs
//! take the same path and produce the same bytes on the wire.

use crate::credentials::{CredentialStore, PasswordHash, hash_password, lookup_blocking};
use crate::error::{Result, TransferError};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::constants::{AUTH_OK, AUTH_REPLY_LEN, HMAC_BLOCK, NONCE_SIZE};
use super::protocol::{
    StatusToken, UsernameBlock, decode_block, encode_username, read_block, write_block,
    write_status,
};
use super::session::{HandshakeState, Session};

type HmacSha256 = Hmac<Sha256>;

pub type Nonce = [u8; NONCE_SIZE];
pub type AuthProof = [u8; HMAC_BLOCK];

/// Fresh challenge from the thread-local CSPRNG
pub fn generate_nonce() -> Nonce {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

/// `HMAC-SHA256(nonce)` keyed by the raw password hash bytes
pub fn compute_proof(key: &PasswordHash, nonce: &Nonce) -> Result<AuthProof> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| TransferError::Credentials(format!("invalid HMAC key: {e}")))?;
    mac.update(nonce);
    let mut proof = [0u8; HMAC_BLOCK];
    proof.copy_from_slice(&mac.finalize().into_bytes());
    Ok(proof)
}

/// Constant-time check of `proof`. With no stored hash the comparison still
/// runs against a throwaway key and the result is always false.
fn verify_proof(stored: Option<&PasswordHash>, nonce: &Nonce, proof: &AuthProof) -> Result<bool> {
    let dummy = PasswordHash::from_bytes([0u8; 32]);
    let expected = compute_proof(stored.unwrap_or(&dummy), nonce)?;
    let matches: bool = expected[..].ct_eq(&proof[..]).into();
    Ok(matches && stored.is_some())
}

/// What the sender proves itself with.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    username: String,
    username_block: UsernameBlock,
    password_hash: PasswordHash,
}

impl ClientCredentials {
    /// Fails with `FieldTooLong` if the username does not fit its block.
    pub fn new(username: &str, password_hash: PasswordHash) -> Result<Self> {
        Ok(Self {
            username: username.to_string(),
            username_block: encode_username(username)?,
            password_hash,
        })
    }

    pub fn from_password(username: &str, password: &str) -> Result<Self> {
        Self::new(username, hash_password(password))
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Receiver side. `session` must be in `TlsEstablished`; on return it is
/// `Authenticated` (returns true) or `Rejected` (returns false).
pub async fn respond<S>(
    stream: &mut S,
    session: &mut Session,
    store: &Arc<dyn CredentialStore>,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce = generate_nonce();
    session.advance(HandshakeState::NonceExchanged)?;
    session.set_nonce(nonce);
    write_block(stream, &nonce).await?;

    let user_block: UsernameBlock = read_block(stream, "username block").await?;
    let proof: AuthProof = read_block(stream, "HMAC block").await?;
    session.advance(HandshakeState::CredentialsExchanged)?;

    let username = decode_block("username", &user_block).ok();
    let stored = match username.as_deref() {
        Some(name) => lookup_blocking(store.clone(), name.to_string())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("{}: credential lookup failed: {}", session.peer(), e);
                None
            }),
        None => None,
    };
    let accepted = verify_proof(stored.as_ref(), &nonce, &proof)?;
    if let Some(name) = username {
        session.set_username(name);
    }

    if accepted {
        write_status(stream, StatusToken::AuthOk).await?;
        session.advance(HandshakeState::Authenticated)?;
        tracing::info!(
            "{}: authenticated as {}",
            session.peer(),
            session.username().unwrap_or_default()
        );
    } else {
        write_status(stream, StatusToken::AuthFail).await?;
        session.advance(HandshakeState::Rejected)?;
        tracing::warn!(
            "{}: authentication failed for {:?}",
            session.peer(),
            session.username()
        );
    }
    Ok(accepted)
}

/// Sender side. `session` must be in `TlsEstablished`. Returns
/// [`TransferError::AuthRejected`] unless the receiver answers `AUTH_OK`.
pub async fn initiate<S>(
    stream: &mut S,
    session: &mut Session,
    credentials: &ClientCredentials,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce: Nonce = read_block(stream, "nonce").await?;
    session.advance(HandshakeState::NonceExchanged)?;
    session.set_nonce(nonce);

    let proof = compute_proof(&credentials.password_hash, &nonce)?;
    stream.write_all(&credentials.username_block).await?;
    write_block(stream, &proof).await?;
    session.set_username(credentials.username.clone());
    session.advance(HandshakeState::CredentialsExchanged)?;

    let reply: [u8; AUTH_REPLY_LEN] = read_block(stream, "auth result").await?;
    tracing::debug!("Auth response: {}", String::from_utf8_lossy(&reply));
    if reply.as_slice() == AUTH_OK {
        session.advance(HandshakeState::Authenticated)?;
        Ok(())
    } else {
        session.advance(HandshakeState::Rejected)?;
        Err(TransferError::AuthRejected)
    }
}
