#![allow(dead_code)]

use filedrop_core::config::TrustPolicy;
use filedrop_core::transfer::{ClientCredentials, FileSender, ServerOptions, TransferServer};
use filedrop_core::{EventSink, MemoryCredentialStore, ReceiveDir, TransferEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestServer {
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
    pub events: mpsc::Receiver<TransferEvent>,
    pub dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Receiver on 127.0.0.1 with user alice/secret and an ephemeral certificate.
pub async fn start_server(configure: impl FnOnce(&mut ServerOptions)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = EventSink::channel(1024);
    let mut options = ServerOptions {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        receive_dir: ReceiveDir::new(dir.path()),
        credentials: Arc::new(MemoryCredentialStore::new().with_user("alice", "secret")),
        tls: Default::default(),
        handshake_timeout: Some(Duration::from_secs(5)),
        events,
    };
    configure(&mut options);

    let server = TransferServer::bind(options).await.unwrap();
    let addr = server.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(server.run(cancel.clone()));

    TestServer {
        addr,
        cancel,
        events: rx,
        dir,
    }
}

pub fn sender(addr: SocketAddr, username: &str, password: &str) -> FileSender {
    sender_with_trust(addr, username, password, &TrustPolicy::AcceptAny)
}

pub fn sender_with_trust(
    addr: SocketAddr,
    username: &str,
    password: &str,
    trust: &TrustPolicy,
) -> FileSender {
    let credentials = ClientCredentials::from_password(username, password).unwrap();
    FileSender::new("127.0.0.1", addr.port(), credentials, trust)
        .unwrap()
        .with_handshake_timeout(Some(Duration::from_secs(5)))
}

/// Next event matching `pred`, skipping others
pub async fn wait_for_event<F>(events: &mut mpsc::Receiver<TransferEvent>, mut pred: F) -> TransferEvent
where
    F: FnMut(&TransferEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
