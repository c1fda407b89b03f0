use crate::config::TrustPolicy;
use crate::error::{Result, TransferError};
use crate::{EventSink, TransferEvent};
use rustls::pki_types::ServerName;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::constants::{BUFFER_SIZE, SUCCESS, SUCCESS_LEN, get_handshake_timeout};
use super::handshake::{ClientCredentials, initiate};
use super::protocol::{encode_filename, write_block};
use super::session::{HandshakeState, Session};
use super::tls::{make_connector, server_name};
use super::utils::{format_transfer_speed, progress_percent, with_deadline};

/// One file to send, optionally under a different name on the receiver
#[derive(Debug, Clone)]
pub struct SendItem {
    pub path: PathBuf,
    pub display_name: Option<String>,
}

impl SendItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            display_name: None,
        }
    }

    pub fn named(path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: Some(display_name.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendReport {
    pub peer: SocketAddr,
    pub file_name: String,
    pub bytes: u64,
}

/// Stream an already-authenticated session's payload: filename block, file
/// bytes, half-close, then wait for `SUCCESS`. Returns the bytes sent.
pub async fn send_payload<S, R>(
    stream: &mut S,
    session: &mut Session,
    file_name: &str,
    source: &mut R,
    total_bytes: u64,
    events: &EventSink,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    session.require_authenticated()?;
    let filename_block = encode_filename(file_name)?;
    write_block(stream, &filename_block).await?;

    let start_time = Instant::now();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = source.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buffer[..n]).await?;
        sent += n as u64;
        session.add_bytes(n as u64);
        emit_progress(events, file_name, sent, total_bytes, start_time);
    }
    if sent == 0 {
        emit_progress(events, file_name, 0, total_bytes, start_time);
    }

    // close_notify, then TCP write shutdown
    stream.shutdown().await?;
    read_completion(stream).await?;

    tracing::info!("{}: {} acknowledged ({} bytes)", session.peer(), file_name, sent);
    Ok(sent)
}

fn emit_progress(events: &EventSink, file_name: &str, sent: u64, total: u64, start: Instant) {
    events.emit(TransferEvent::Progress {
        file_name: file_name.to_string(),
        bytes_sent: sent,
        total_bytes: total,
        percent: progress_percent(sent, total),
        speed: format_transfer_speed(sent, start.elapsed().as_secs_f64()),
    });
}

/// Anything short of the full `SUCCESS` token, including a closed stream,
/// is a failed transfer.
async fn read_completion<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut token = Vec::with_capacity(SUCCESS_LEN);
    let mut buf = [0u8; SUCCESS_LEN];
    while token.len() < SUCCESS_LEN {
        let want = SUCCESS_LEN - token.len();
        match stream.read(&mut buf[..want]).await {
            Ok(0) => break,
            Ok(n) => token.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }
    if token != SUCCESS {
        return Err(TransferError::AckMismatch {
            received: String::from_utf8_lossy(&token).into_owned(),
        });
    }
    Ok(())
}

/// Sends files to one receiver, a fresh connection per file.
pub struct FileSender {
    host: String,
    port: u16,
    credentials: ClientCredentials,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    handshake_timeout: Option<Duration>,
    events: EventSink,
}

impl FileSender {
    pub fn new(
        host: &str,
        port: u16,
        credentials: ClientCredentials,
        trust: &TrustPolicy,
    ) -> Result<Self> {
        Ok(Self {
            host: host.to_string(),
            port,
            credentials,
            connector: make_connector(trust)?,
            server_name: server_name(host)?,
            handshake_timeout: get_handshake_timeout(),
            events: EventSink::none(),
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Send one file. The name and file are checked before connecting, so
    /// an oversized name or a directory never reaches the network.
    pub async fn send_file(&self, path: &Path, display_name: Option<&str>) -> Result<SendReport> {
        let file_name = match display_name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_owned)
                .ok_or(TransferError::InvalidField { field: "filename" })?,
        };
        encode_filename(&file_name)?;

        let mut file = File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        let total_bytes = metadata.len();

        let addr = format!("{}:{}", self.host, self.port);
        tracing::info!("Connecting to {} to send {}", addr, file_name);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransferError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let peer = tcp.peer_addr()?;
        let mut session = Session::new(peer);

        let mut tls = with_deadline(self.handshake_timeout, "handshake", async {
            let mut tls = self
                .connector
                .connect(self.server_name.clone(), tcp)
                .await
                .map_err(|e| TransferError::Tls(e.to_string()))?;
            session.advance(HandshakeState::TlsEstablished)?;
            initiate(&mut tls, &mut session, &self.credentials).await?;
            Ok::<_, TransferError>(tls)
        })
        .await?;

        let bytes = send_payload(
            &mut tls,
            &mut session,
            &file_name,
            &mut file,
            total_bytes,
            &self.events,
        )
        .await?;

        self.events.emit(TransferEvent::Completed {
            file_name: file_name.clone(),
            bytes,
        });
        Ok(SendReport {
            peer,
            file_name,
            bytes,
        })
    }

    /// Send in order, stopping at the first failure
    pub async fn send_files(&self, items: &[SendItem]) -> Result<Vec<SendReport>> {
        let mut reports = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            tracing::debug!(
                "Sending file {}/{}: {}",
                idx + 1,
                items.len(),
                item.path.display()
            );
            let report = self
                .send_file(&item.path, item.display_name.as_deref())
                .await?;
            reports.push(report);
        }
        Ok(reports)
    }
}
