use crate::error::{Result, TransferError};
use crate::transfer::constants::FILENAME_BLOCK;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};

/// Create (or truncate) a file with secure permissions (0o600 on Unix) for writing
pub async fn open_secure_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "Starting...".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Percentage of `total` covered by `done`. An empty file is complete from the start.
pub fn progress_percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as f32
}

/// Run `fut` under an optional deadline, reporting expiry as a timeout in `phase`.
pub async fn with_deadline<T, F>(limit: Option<Duration>, phase: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransferError::Timeout { phase })?,
        None => fut.await,
    }
}

/// Sanitize file name to prevent path traversal attacks and ensure safety
pub fn sanitize_file_name(file_name: &str) -> String {
    // Keep only the last component, whichever separator the sender used
    let file_name = file_name
        .split(['/', '\\'])
        .last()
        .unwrap_or_default();

    let clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    // See: https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved_names
        .iter()
        .any(|&r| clean_name.eq_ignore_ascii_case(r))
    {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    // Names arrive from a 256-byte block, so this only guards direct callers
    if clean_name.len() > FILENAME_BLOCK {
        let mut cutoff = FILENAME_BLOCK;
        while !clean_name.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        return clean_name[..cutoff].to_string();
    }

    clean_name
}
