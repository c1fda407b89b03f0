use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transfer::constants::{
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, TRANSFER_PORT, deadline_from_secs,
    handshake_timeout_override,
};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "filedrop";
const APP_NAME: &str = "filedrop";
const CONFIG_FILE: &str = "config.json";
const USERS_FILE: &str = "users.txt";
const RECEIVE_DIR_NAME: &str = "shared";

/// How the sender decides whether to trust the receiver's certificate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrustPolicy {
    /// Any certificate; handshake signatures are still checked
    #[default]
    AcceptAny,
    /// End-entity certificate must have this SHA-256 fingerprint (hex)
    Pinned { sha256: String },
    /// Standard chain validation against the roots in a PEM bundle
    CaFile { path: PathBuf },
}

/// Receiver certificate. Both unset means an ephemeral self-signed one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    pub receive_dir: PathBuf,
    pub users_file: PathBuf,
    pub tls: TlsSettings,
    pub trust: TrustPolicy,
    pub handshake_timeout_secs: u64,
    pub sanitize_filenames: bool,
    pub last_host: Option<String>,
    pub last_username: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: TRANSFER_PORT,
            receive_dir: default_receive_dir(),
            users_file: default_users_file(),
            tls: TlsSettings::default(),
            trust: TrustPolicy::default(),
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            sanitize_filenames: true,
            last_host: None,
            last_username: None,
        }
    }
}

impl AppConfig {
    /// Get the config file path
    pub fn get_config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// A missing file gives defaults; a corrupt one is reported and ignored
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::get_config_path().context("no config directory available")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Deadline for TLS plus authentication; `FILEDROP_HANDSHAKE_TIMEOUT` wins
    pub fn handshake_timeout(&self) -> Option<Duration> {
        deadline_from_secs(handshake_timeout_override().unwrap_or(self.handshake_timeout_secs))
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("FILEDROP_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

fn default_receive_dir() -> PathBuf {
    UserDirs::new()
        .map(|dirs| {
            dirs.document_dir()
                .unwrap_or_else(|| dirs.home_dir())
                .to_path_buf()
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join(RECEIVE_DIR_NAME)
}

fn default_users_file() -> PathBuf {
    get_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(USERS_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.port, 5000);
        assert!(config.sanitize_filenames);
        assert_eq!(config.trust, TrustPolicy::AcceptAny);
        assert!(config.receive_dir.ends_with("shared"));
        assert!(config.users_file.ends_with("users.txt"));
    }

    #[test]
    fn test_missing_and_corrupt_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert_eq!(AppConfig::load_from(&path).port, TRANSFER_PORT);

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(AppConfig::load_from(&path).port, TRANSFER_PORT);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig {
            port: 6000,
            trust: TrustPolicy::Pinned {
                sha256: "ab".repeat(32),
            },
            last_host: Some("10.0.0.5".into()),
            last_username: Some("alice".into()),
            ..AppConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path), config);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"port": 7000, "trust": {"mode": "ca_file", "path": "/etc/filedrop/ca.pem"}}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path);
        assert_eq!(config.port, 7000);
        assert_eq!(
            config.trust,
            TrustPolicy::CaFile {
                path: PathBuf::from("/etc/filedrop/ca.pem")
            }
        );
        assert!(config.sanitize_filenames);
        assert_eq!(config.handshake_timeout_secs, DEFAULT_HANDSHAKE_TIMEOUT_SECS);
    }
}
