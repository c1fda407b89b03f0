//! Fixed-width framing for the transfer protocol.
//!
//! Every field on the wire has a fixed size and is read with [`read_block`];
//! strings are UTF-8, zero-padded to the block size, and never truncated.

use crate::error::{Result, TransferError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::{AUTH_FAIL, AUTH_OK, FILENAME_BLOCK, SUCCESS, USER_BLOCK};

pub type UsernameBlock = [u8; USER_BLOCK];
pub type FilenameBlock = [u8; FILENAME_BLOCK];

/// Literal ASCII status tokens written by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusToken {
    AuthOk,
    AuthFail,
    Success,
}

impl StatusToken {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            StatusToken::AuthOk => AUTH_OK,
            StatusToken::AuthFail => AUTH_FAIL,
            StatusToken::Success => SUCCESS,
        }
    }
}

/// Zero-pad `value` into an `N`-byte block, failing if it does not fit.
pub fn encode_block<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N]> {
    let bytes = value.as_bytes();
    if bytes.len() > N {
        return Err(TransferError::FieldTooLong {
            field,
            len: bytes.len(),
            max: N,
        });
    }
    let mut block = [0u8; N];
    block[..bytes.len()].copy_from_slice(bytes);
    Ok(block)
}

pub fn encode_username(username: &str) -> Result<UsernameBlock> {
    encode_block("username", username)
}

pub fn encode_filename(file_name: &str) -> Result<FilenameBlock> {
    encode_block("filename", file_name)
}

/// Strip trailing NUL padding and decode as UTF-8.
pub fn decode_block(field: &'static str, block: &[u8]) -> Result<String> {
    let end = block
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    std::str::from_utf8(&block[..end])
        .map(str::to_owned)
        .map_err(|_| TransferError::InvalidField { field })
}

/// Read exactly `N` bytes. A peer that closes before the block fills is
/// reported as [`TransferError::Disconnected`].
pub async fn read_block<R, const N: usize>(reader: &mut R, field: &'static str) -> Result<[u8; N]>
where
    R: AsyncRead + Unpin,
{
    let mut block = [0u8; N];
    match reader.read_exact(&mut block).await {
        Ok(_) => Ok(block),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(TransferError::Disconnected { field })
        }
        Err(e) => Err(e.into()),
    }
}

/// Write a whole block and flush it through any TLS buffering.
pub async fn write_block<W>(writer: &mut W, block: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(block).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_status<W>(writer: &mut W, token: StatusToken) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_block(writer, token.as_bytes()).await
}
