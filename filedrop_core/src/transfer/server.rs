//! Connection supervisor for the receiving side.
//!
//! One accept loop, one task per connection. A connection's failure is
//! logged, reported as an event, and stays inside its task.

use crate::config::{AppConfig, TlsSettings};
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::error::{Result, TransferError};
use crate::storage::ReceiveDir;
use crate::{EventSink, TransferEvent};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::handshake::respond;
use super::receiver::{ReceivedFile, receive_payload};
use super::session::{HandshakeState, Session};
use super::tls::{load_server_identity, make_acceptor};
use super::utils::with_deadline;

/// Back-off after a failed accept, e.g. when out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct ServerOptions {
    pub bind_addr: SocketAddr,
    pub receive_dir: ReceiveDir,
    pub credentials: Arc<dyn CredentialStore>,
    pub tls: TlsSettings,
    pub handshake_timeout: Option<Duration>,
    pub events: EventSink,
}

impl ServerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)),
            receive_dir: ReceiveDir::new(&config.receive_dir)
                .with_sanitize(config.sanitize_filenames),
            credentials: Arc::new(FileCredentialStore::new(&config.users_file)),
            tls: config.tls.clone(),
            handshake_timeout: config.handshake_timeout(),
            events: EventSink::none(),
        }
    }
}

/// Shared, read-only state handed to every connection task
struct ConnectionContext {
    acceptor: TlsAcceptor,
    receive_dir: ReceiveDir,
    credentials: Arc<dyn CredentialStore>,
    handshake_timeout: Option<Duration>,
    events: EventSink,
}

pub struct TransferServer {
    listener: TcpListener,
    context: Arc<ConnectionContext>,
}

impl TransferServer {
    /// Load the certificate, create the receive directory and bind.
    pub async fn bind(options: ServerOptions) -> Result<Self> {
        let (certs, key) = load_server_identity(&options.tls)?;
        let acceptor = make_acceptor(certs, key)?;
        options.receive_dir.ensure().await?;

        let listener = TcpListener::bind(options.bind_addr).await?;
        tracing::info!(
            "Listening on {}, saving files to {}",
            listener.local_addr()?,
            options.receive_dir.root().display()
        );

        Ok(Self {
            listener,
            context: Arc::new(ConnectionContext {
                acceptor,
                receive_dir: options.receive_dir,
                credentials: options.credentials,
                handshake_timeout: options.handshake_timeout,
                events: options.events,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `cancel` fires. Connections already running are left
    /// to finish.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Transfer server stopping");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let context = self.context.clone();
                        let span = tracing::info_span!("connection", %peer);
                        tokio::spawn(
                            async move {
                                handle_connection(context, stream, peer).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        tracing::error!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }
}

async fn handle_connection(context: Arc<ConnectionContext>, stream: TcpStream, peer: SocketAddr) {
    tracing::info!("Accepted connection");
    if let Err(e) = serve_connection(&context, stream, peer).await {
        if e.is_disconnect() {
            tracing::warn!("Peer went away: {}", e);
        } else {
            tracing::error!("Connection failed: {}", e);
        }
        context.events.emit(TransferEvent::Error {
            peer: Some(peer),
            message: e.to_string(),
        });
    }
}

/// TLS, handshake and payload for one connection. `None` means the peer
/// was rejected.
async fn serve_connection(
    context: &ConnectionContext,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<Option<ReceivedFile>> {
    let mut session = Session::new(peer);

    let (mut tls, accepted) = with_deadline(context.handshake_timeout, "handshake", async {
        let mut tls = context
            .acceptor
            .accept(stream)
            .await
            .map_err(|e| TransferError::Tls(e.to_string()))?;
        session.advance(HandshakeState::TlsEstablished)?;
        let accepted = respond(&mut tls, &mut session, &context.credentials).await?;
        Ok::<_, TransferError>((tls, accepted))
    })
    .await?;

    if !accepted {
        context.events.emit(TransferEvent::Rejected {
            peer,
            username: session.username().map(str::to_owned),
        });
        if let Err(e) = tls.shutdown().await {
            tracing::debug!("Shutdown after rejection failed: {}", e);
        }
        return Ok(None);
    }

    context.events.emit(TransferEvent::Authenticated {
        peer,
        username: session.username().unwrap_or_default().to_string(),
    });

    let received = receive_payload(&mut tls, &mut session, &context.receive_dir).await?;
    context.events.emit(TransferEvent::FileReceived {
        peer,
        file_name: received.file_name.clone(),
        path: received.path.clone(),
        bytes: received.bytes,
    });
    Ok(Some(received))
}
