mod common;

use common::{Policy, handshake, init_tracing, start_receiver, test_config};
use lancryptor_core::AppEvent;
use lancryptor_core::crypto::{SessionKey, asymmetric_encrypt, parse_public_key};
use lancryptor_core::keystore::KeyStore;
use lancryptor_core::transfer::codec::{TransferHeader, read_u8, recv_exact, write_blob};
use lancryptor_core::transfer::constants::{HANDSHAKE_TOKEN, REJECT_BYTE};
use lancryptor_core::transfer::{SendContext, SendOutcome, send_file};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_rejection_stops_before_session_key() {
    let mut receiver = start_receiver(Policy::Reject).await;
    let (mut stream, pem) = handshake(receiver.addr).await;
    assert!(pem.starts_with(b"-----BEGIN PUBLIC KEY-----"));

    assert_eq!(read_u8(&mut stream).await.unwrap(), 0x00);

    // Whatever the sender pushes now is never read; the receiver has closed
    let _ = stream.write_all(&[0u8; 64]).await;
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut rest))
        .await
        .expect("receiver kept the connection open");
    if let Ok(n) = read {
        assert_eq!(n, 0, "receiver sent data after rejecting");
    }

    receiver
        .wait_for_line(|l| l == "Connection rejected by user.")
        .await;
    assert!(!receiver.config.received_dir.exists());
}

#[tokio::test]
async fn test_sender_sees_rejection() {
    let receiver = start_receiver(Policy::Reject).await;
    let file = receiver.write_source("secret.txt", b"classified");
    let (ctx, _events) = receiver.sender();

    let outcome = send_file(receiver.addr, &file, &ctx, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::RejectedByPeer);
    assert!(!receiver.config.received_dir.exists());
}

#[tokio::test]
async fn test_stop_while_waiting_counts_as_reject() {
    let mut receiver = start_receiver(Policy::Manual).await;
    let (mut stream, _pem) = handshake(receiver.addr).await;

    // Wait until the handler is parked on the confirmation
    loop {
        match receiver.events.recv().await.unwrap() {
            AppEvent::ConfirmationRequested(_) => break,
            _ => continue,
        }
    }
    assert_eq!(receiver.bridge.pending_count().await, 1);

    receiver.handle.stop();
    assert_eq!(read_u8(&mut stream).await.unwrap(), 0x00);

    receiver
        .wait_for_line(|l| l == "Receiver stopped.")
        .await;

    // The abandoned request is withdrawn from the bridge
    for _ in 0..50 {
        if receiver.bridge.pending_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(receiver.bridge.pending_count().await, 0);
}

#[tokio::test]
async fn test_confirmations_are_per_connection() {
    let mut receiver = start_receiver(Policy::Manual).await;
    let (mut first, _) = handshake(receiver.addr).await;
    let (mut second, _) = handshake(receiver.addr).await;

    let mut requests = Vec::new();
    while requests.len() < 2 {
        if let AppEvent::ConfirmationRequested(request) = receiver.events.recv().await.unwrap() {
            requests.push(request);
        }
    }
    assert_eq!(receiver.bridge.pending_count().await, 2);
    assert_ne!(requests[0].id, requests[1].id);
    // Same receiver key, so both requests show the same fingerprint
    assert_eq!(requests[0].fingerprint, requests[1].fingerprint);

    let first_port = first.local_addr().unwrap().port();
    for request in &requests {
        let accept = request.peer.port() == first_port;
        assert!(receiver.bridge.respond(request.id, accept).await);
    }

    assert_eq!(read_u8(&mut first).await.unwrap(), 0x01);
    assert_eq!(read_u8(&mut second).await.unwrap(), 0x00);
}

#[tokio::test]
async fn test_rejected_sender_writes_nothing_after_token() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let keystore = KeyStore::from_config(&config);
    keystore.ensure_keypair().await.unwrap();
    let pem = keystore.load_public_key_pem().await.unwrap();

    // Minimal receiver: serve the key, refuse, then record everything the sender writes
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let token = recv_exact(&mut stream, HANDSHAKE_TOKEN.len()).await.unwrap();
        assert_eq!(token, HANDSHAKE_TOKEN);
        write_blob(&mut stream, &pem).await.unwrap();
        stream.write_all(&[REJECT_BYTE]).await.unwrap();
        stream.flush().await.unwrap();

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut rest))
            .await
            .expect("sender kept the connection open")
            .unwrap();
        rest
    });

    let file = dir.path().join("secret.txt");
    std::fs::write(&file, b"classified").unwrap();
    let (event_tx, _events) = mpsc::channel(100);
    let ctx = SendContext {
        keystore,
        config,
        event_tx,
    };

    let outcome = send_file(addr, &file, &ctx, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::RejectedByPeer);

    let rest = peer.await.unwrap();
    assert!(rest.is_empty(), "sender wrote {} bytes after rejection", rest.len());
}

#[tokio::test]
async fn test_unanswered_confirmation_times_out_as_rejection() {
    let receiver = start_receiver(Policy::Manual).await;
    let file = receiver.write_source("waiting.txt", b"nobody home");
    let (mut ctx, _events) = receiver.sender();
    ctx.config.confirmation_timeout_secs = 1;

    let started = std::time::Instant::now();
    let outcome = send_file(receiver.addr, &file, &ctx, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::RejectedByPeer);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!receiver.config.received_dir.exists());
}

#[tokio::test]
async fn test_stop_mid_stream_cancels_receive() {
    let mut receiver = start_receiver(Policy::Accept).await;
    let (mut stream, pem) = handshake(receiver.addr).await;
    assert_eq!(read_u8(&mut stream).await.unwrap(), 0x01);

    let key = parse_public_key(&pem).unwrap();
    let session = SessionKey::generate();
    let wrapped = asymmetric_encrypt(&session.to_bytes(), &key).unwrap();
    write_blob(&mut stream, &wrapped).await.unwrap();

    // Announce 1 MiB but deliver only the first 64 KiB
    let header = TransferHeader {
        file_name: "big.bin".to_string(),
        content_hash: [0u8; 32],
        payload_len: 1 << 20,
    };
    header.write_to(&mut stream).await.unwrap();
    stream.write_all(&vec![0u8; 64 * 1024]).await.unwrap();
    stream.flush().await.unwrap();

    // Wait until the handler is inside the streaming loop
    loop {
        match receiver.events.recv().await.unwrap() {
            AppEvent::TransferProgress {
                is_sending: false, ..
            } => break,
            _ => continue,
        }
    }

    receiver.handle.stop();
    receiver
        .wait_for_line(|l| l == "Transfer stopped by user.")
        .await;
    assert!(!receiver.config.received_dir.exists());
}
