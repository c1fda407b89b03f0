mod common;

use common::{WAIT, sender, sender_with_trust, start_server, wait_for_event};
use filedrop_core::config::{TlsSettings, TrustPolicy};
use filedrop_core::transfer::handshake::initiate;
use filedrop_core::transfer::protocol::encode_filename;
use filedrop_core::transfer::tls::{
    certificate_fingerprint, generate_self_signed_cert, make_connector, server_name,
};
use filedrop_core::transfer::{ClientCredentials, HandshakeState, Session};
use filedrop_core::{TransferError, TransferEvent};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn test_oversized_filename_never_connects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("f.txt");
    std::fs::write(&path, b"x").unwrap();

    let name = "a".repeat(257);
    let err = sender(addr, "alice", "secret")
        .send_file(&path, Some(&name))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::FieldTooLong { field: "filename", len: 257, max: 256 }
    ));

    let accepted = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(accepted.is_err(), "sender connected despite oversized name");
}

#[tokio::test]
async fn test_directory_never_connects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let src = tempfile::tempdir().unwrap();
    let folder = src.path().join("photos");
    std::fs::create_dir(&folder).unwrap();
    std::fs::write(folder.join("a.jpg"), b"jpg").unwrap();

    let err = sender(addr, "alice", "secret")
        .send_file(&folder, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::NotAFile { .. }), "got {err:?}");

    let accepted = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(accepted.is_err(), "sender connected for a directory");
}

#[test]
fn test_oversized_username_rejected_before_sending() {
    let err = ClientCredentials::from_password(&"u".repeat(65), "secret").unwrap_err();
    assert!(matches!(
        err,
        TransferError::FieldTooLong { field: "username", len: 65, max: 64 }
    ));
}

#[tokio::test]
async fn test_concurrent_transfers_survive_an_aborting_peer() {
    let server = start_server(|_| {}).await;
    let src = tempfile::tempdir().unwrap();
    let addr = server.addr;

    // Authenticates, starts a payload, then vanishes
    let aborter = tokio::spawn(async move {
        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut session = Session::new(addr);
        let connector = make_connector(&TrustPolicy::AcceptAny).unwrap();
        let mut tls = connector
            .connect(server_name("127.0.0.1").unwrap(), tcp)
            .await
            .unwrap();
        session.advance(HandshakeState::TlsEstablished).unwrap();
        let creds = ClientCredentials::from_password("alice", "secret").unwrap();
        initiate(&mut tls, &mut session, &creds).await.unwrap();
        tls.write_all(&encode_filename("aborted.bin").unwrap()).await.unwrap();
        tls.write_all(&[0u8; 4096]).await.unwrap();
        tls.flush().await.unwrap();
        drop(tls);
    });

    let mut handles = Vec::new();
    for i in 0..8 {
        let name = format!("concurrent_{i}.bin");
        let content = vec![i as u8; 50_000 + i * 1000];
        let path = src.path().join(&name);
        std::fs::write(&path, &content).unwrap();
        handles.push(tokio::spawn(async move {
            sender(addr, "alice", "secret")
                .send_file(&path, None)
                .await
                .map(|report| (report, content))
        }));
    }

    aborter.await.unwrap();
    for handle in handles {
        let (report, content) = tokio::time::timeout(WAIT, handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let stored = std::fs::read(server.dir.path().join(&report.file_name)).unwrap();
        assert_eq!(stored, content);
    }
}

#[tokio::test]
async fn test_silent_peer_hits_handshake_deadline() {
    let mut server = start_server(|options| {
        options.handshake_timeout = Some(Duration::from_millis(200));
    })
    .await;

    let _idle = TcpStream::connect(server.addr).await.unwrap();
    let event = wait_for_event(&mut server.events, |e| matches!(e, TransferEvent::Error { .. })).await;
    match event {
        TransferEvent::Error { message, .. } => assert!(message.contains("handshake"), "{message}"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_peer_closing_mid_nonce_is_a_disconnect() {
    // A receiver that sends 10 of 32 nonce bytes over TLS and hangs up
    let generated = generate_self_signed_cert(&["localhost".to_string()]).unwrap();
    let acceptor = filedrop_core::transfer::tls::make_acceptor(
        generated.certs.clone(),
        generated.key.clone_key(),
    )
    .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();
        tls.write_all(&[9u8; 10]).await.unwrap();
        tls.shutdown().await.unwrap();
    });

    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("f.txt");
    std::fs::write(&path, b"x").unwrap();
    let err = tokio::time::timeout(WAIT, sender(addr, "alice", "secret").send_file(&path, None))
        .await
        .expect("sender hung on a closed peer")
        .unwrap_err();
    assert!(
        matches!(err, TransferError::Disconnected { field: "nonce" }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_pinned_certificate() {
    let certs_dir = tempfile::tempdir().unwrap();
    let generated = generate_self_signed_cert(&["localhost".to_string()]).unwrap();
    let cert_path = certs_dir.path().join("cert.pem");
    let key_path = certs_dir.path().join("key.pem");
    std::fs::write(&cert_path, &generated.cert_pem).unwrap();
    std::fs::write(&key_path, &generated.key_pem).unwrap();
    let fingerprint = certificate_fingerprint(&generated.certs[0]);

    let server = start_server(|options| {
        options.tls = TlsSettings {
            cert_path: Some(cert_path),
            key_path: Some(key_path),
        };
    })
    .await;

    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("pinned.txt");
    std::fs::write(&path, b"pinned").unwrap();

    let good = TrustPolicy::Pinned {
        sha256: fingerprint.to_uppercase(),
    };
    sender_with_trust(server.addr, "alice", "secret", &good)
        .send_file(&path, None)
        .await
        .unwrap();

    let bad = TrustPolicy::Pinned {
        sha256: "0".repeat(64),
    };
    let err = sender_with_trust(server.addr, "alice", "secret", &bad)
        .send_file(&path, Some("other.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Tls(_)), "got {err:?}");
    assert!(!server.dir.path().join("other.txt").exists());
}

#[tokio::test]
async fn test_ca_file_without_matching_root_fails() {
    let server = start_server(|_| {}).await;
    let certs_dir = tempfile::tempdir().unwrap();
    let unrelated = generate_self_signed_cert(&["localhost".to_string()]).unwrap();
    let ca_path = certs_dir.path().join("ca.pem");
    std::fs::write(&ca_path, &unrelated.cert_pem).unwrap();

    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("f.txt");
    std::fs::write(&path, b"x").unwrap();

    let err = sender_with_trust(
        server.addr,
        "alice",
        "secret",
        &TrustPolicy::CaFile { path: ca_path },
    )
    .send_file(&path, None)
    .await
    .unwrap_err();
    assert!(matches!(err, TransferError::Tls(_)), "got {err:?}");
}
