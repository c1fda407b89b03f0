use crate::error::Result;
use crate::storage::ReceiveDir;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::BUFFER_SIZE;
use super::protocol::{FilenameBlock, StatusToken, decode_block, read_block, write_status};
use super::session::Session;

/// A file written to disk and acknowledged to the sender
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Receive one file after a successful handshake: filename block, payload
/// until end-of-stream, then `SUCCESS`.
pub async fn receive_payload<S>(
    stream: &mut S,
    session: &mut Session,
    receive_dir: &ReceiveDir,
) -> Result<ReceivedFile>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session.require_authenticated()?;

    let block: FilenameBlock = read_block(stream, "filename block").await?;
    let file_name = decode_block("filename", &block)?;
    let (path, mut file) = receive_dir.create(&file_name).await?;
    tracing::info!(
        "{}: receiving {} into {}",
        session.peer(),
        file_name,
        path.display()
    );

    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            // TCP closed without close_notify
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::debug!("{}: stream ended without close_notify", session.peer());
                break;
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&buffer[..n]).await?;
        session.add_bytes(n as u64);
    }
    file.flush().await?;
    drop(file);

    write_status(stream, StatusToken::Success).await?;
    if let Err(e) = stream.shutdown().await {
        tracing::debug!("{}: shutdown after ack failed: {}", session.peer(), e);
    }

    tracing::info!(
        "{}: received {} ({} bytes)",
        session.peer(),
        file_name,
        session.bytes_transferred()
    );
    Ok(ReceivedFile {
        file_name,
        path,
        bytes: session.bytes_transferred(),
    })
}
