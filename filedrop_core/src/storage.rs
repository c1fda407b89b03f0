//! Where received files land.

use crate::error::{Result, TransferError};
use crate::transfer::utils::{open_secure_file, sanitize_file_name};
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// A file already present in the receive directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEntry {
    pub file_name: String,
    pub size: u64,
}

/// Destination root for incoming transfers.
///
/// With `sanitize` on (the default) only the final path component of the
/// sender's filename is used. With it off the name is joined to the root
/// as-is, which lets a sender write outside the root.
#[derive(Debug, Clone)]
pub struct ReceiveDir {
    root: PathBuf,
    sanitize: bool,
}

impl ReceiveDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sanitize: true,
        }
    }

    pub fn with_sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root if it does not exist yet
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn resolve(&self, file_name: &str) -> PathBuf {
        if self.sanitize {
            self.root.join(sanitize_file_name(file_name))
        } else {
            self.root.join(file_name)
        }
    }

    /// Create or truncate the destination for `file_name`
    pub async fn create(&self, file_name: &str) -> Result<(PathBuf, File)> {
        let path = self.resolve(file_name);
        let file = open_secure_file(&path).await?;
        Ok((path, file))
    }

    /// Delete a received file from the root. Only the final component of
    /// `file_name` is used, whatever the sanitize setting. Returns false if
    /// there was nothing to delete.
    pub async fn remove(&self, file_name: &str) -> Result<bool> {
        let path = self.root.join(sanitize_file_name(file_name));
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(TransferError::NotAFile { path });
        }
        tokio::fs::remove_file(&path).await?;
        tracing::info!("Deleted {}", path.display());
        Ok(true)
    }

    /// Regular files in the root, sorted by name
    pub async fn list(&self) -> Result<Vec<ReceivedEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                entries.push(ReceivedEntry {
                    file_name: entry.file_name().to_string_lossy().into_owned(),
                    size: metadata.len(),
                });
            }
        }
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }
}
