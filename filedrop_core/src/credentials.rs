//! User credentials for the receiving side.
//!
//! The users file holds one `username:base64(sha256(password))` record per
//! line. It is re-read on every lookup so edits made while the server is
//! running take effect on the next connection.

use crate::error::{Result, TransferError};
use crate::transfer::constants::USER_BLOCK;
use base64::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// SHA-256 of a user's password. The raw bytes double as the HMAC key.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash([u8; 32]);

impl PasswordHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }
}

impl FromStr for PasswordHash {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        let decoded = BASE64_STANDARD
            .decode(s.trim())
            .map_err(|e| TransferError::Credentials(format!("invalid password hash: {e}")))?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| {
            TransferError::Credentials(format!(
                "invalid password hash length: {} bytes, expected 32",
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

// Keep hashes out of logs
impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// Hash a password the way the users file stores it.
pub fn hash_password(password: &str) -> PasswordHash {
    let digest = Sha256::digest(password.trim().as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    PasswordHash(bytes)
}

/// Read access to stored credentials.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, username: &str) -> Result<Option<PasswordHash>>;
}

/// Run `store.lookup` on the blocking pool, since file-backed stores read
/// the disk on every call.
pub async fn lookup_blocking(
    store: Arc<dyn CredentialStore>,
    username: String,
) -> Result<Option<PasswordHash>> {
    tokio::task::spawn_blocking(move || store.lookup(&username))
        .await
        .map_err(|e| TransferError::Credentials(format!("lookup task failed: {e}")))?
}

/// In-memory store, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    users: HashMap<String, PasswordHash>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users
            .insert(username.to_string(), hash_password(password));
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, username: &str) -> Result<Option<PasswordHash>> {
        Ok(self.users.get(username).cloned())
    }
}

/// The users file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All well-formed records in file order. A missing file is an empty store.
    pub fn list_users(&self) -> Result<Vec<(String, PasswordHash)>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TransferError::Credentials(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let mut users = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_record(line) {
                Some(record) => users.push(record),
                None => tracing::warn!(
                    "Skipping malformed line {} in {}",
                    idx + 1,
                    self.path.display()
                ),
            }
        }
        Ok(users)
    }

    /// Append a user. Fails if the name is taken or cannot be sent on the wire.
    pub fn add_user(&self, username: &str, password: &str) -> Result<()> {
        validate_username(username)?;

        let mut users = self.list_users()?;
        if users.iter().any(|(name, _)| name == username) {
            return Err(TransferError::Credentials(format!(
                "user {username} already exists"
            )));
        }
        users.push((username.to_string(), hash_password(password)));
        self.write_all(&users)?;
        tracing::info!("Added user {}", username);
        Ok(())
    }

    /// Remove a user, returning whether a record was deleted.
    pub fn remove_user(&self, username: &str) -> Result<bool> {
        let mut users = self.list_users()?;
        let before = users.len();
        users.retain(|(name, _)| name != username);
        if users.len() == before {
            return Ok(false);
        }
        self.write_all(&users)?;
        tracing::info!("Removed user {}", username);
        Ok(true)
    }

    fn write_all(&self, users: &[(String, PasswordHash)]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = String::new();
        for (name, hash) in users {
            content.push_str(name);
            content.push(':');
            content.push_str(&hash.to_base64());
            content.push('\n');
        }
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn lookup(&self, username: &str) -> Result<Option<PasswordHash>> {
        Ok(self
            .list_users()?
            .into_iter()
            .find(|(name, _)| name == username)
            .map(|(_, hash)| hash))
    }
}

fn parse_record(line: &str) -> Option<(String, PasswordHash)> {
    let (name, hash) = line.split_once(':')?;
    if name.is_empty() || hash.contains(':') {
        return None;
    }
    let hash = hash.parse().ok()?;
    Some((name.to_string(), hash))
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.contains(':') || username.contains('\n') {
        return Err(TransferError::Credentials(format!(
            "invalid username {username:?}"
        )));
    }
    if username.len() > USER_BLOCK {
        return Err(TransferError::FieldTooLong {
            field: "username",
            len: username.len(),
            max: USER_BLOCK,
        });
    }
    Ok(())
}
