use std::time::Duration;

/// Default TCP port for file transfer
pub const TRANSFER_PORT: u16 = 5000;

/// Buffer size for streaming file data (80KB)
pub const BUFFER_SIZE: usize = 80 * 1024;

/// Random challenge issued by the receiver
pub const NONCE_SIZE: usize = 32;

/// Zero-padded username block
pub const USER_BLOCK: usize = 64;

/// HMAC-SHA256 output
pub const HMAC_BLOCK: usize = 32;

/// Zero-padded filename block
pub const FILENAME_BLOCK: usize = 256;

pub const AUTH_OK: &[u8] = b"AUTH_OK";
pub const AUTH_FAIL: &[u8] = b"AUTH_FAIL";
pub const SUCCESS: &[u8] = b"SUCCESS";

/// The sender reads this many bytes of the auth result, enough for `AUTH_OK`
pub const AUTH_REPLY_LEN: usize = 7;

/// Length of the `SUCCESS` completion token
pub const SUCCESS_LEN: usize = 7;

/// Default deadline for TLS handshake plus authentication
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Handshake deadline in seconds from `FILEDROP_HANDSHAKE_TIMEOUT`, if set
pub fn handshake_timeout_override() -> Option<u64> {
    std::env::var("FILEDROP_HANDSHAKE_TIMEOUT")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Zero seconds means no deadline
pub fn deadline_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Handshake deadline, overridable via `FILEDROP_HANDSHAKE_TIMEOUT` (seconds, 0 disables)
pub fn get_handshake_timeout() -> Option<Duration> {
    deadline_from_secs(handshake_timeout_override().unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS))
}
