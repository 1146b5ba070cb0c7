#![allow(dead_code)]

use lancryptor_core::AppEvent;
use lancryptor_core::archive::compress_bytes;
use lancryptor_core::config::AppConfig;
use lancryptor_core::confirm::ConfirmationBridge;
use lancryptor_core::crypto::{
    SessionKey, StreamEncryptor, asymmetric_encrypt, content_hash, parse_public_key, pkcs7_pad,
};
use lancryptor_core::keystore::KeyStore;
use lancryptor_core::transfer::codec::{TransferHeader, read_blob, read_u8, write_blob};
use lancryptor_core::transfer::constants::{HANDSHAKE_TOKEN, MAX_PUBLIC_KEY_LEN};
use lancryptor_core::transfer::{Acceptor, ReceiverContext, ReceiverHandle, SendContext};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// How the test receiver answers fingerprint confirmations
#[derive(Clone, Copy)]
pub enum Policy {
    Accept,
    Reject,
    /// Leave requests pending; the test answers on the bridge itself
    Manual,
}

pub struct TestReceiver {
    pub dir: TempDir,
    pub config: AppConfig,
    pub bridge: ConfirmationBridge,
    pub handle: ReceiverHandle,
    pub addr: SocketAddr,
    pub events: mpsc::UnboundedReceiver<AppEvent>,
}

pub fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        port: 0,
        key_dir: root.join("keys"),
        received_dir: root.join("Received"),
        connect_timeout_secs: 5,
        read_timeout_secs: 5,
        confirmation_timeout_secs: 10,
        ..AppConfig::default()
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init()
        .ok();
}

pub async fn start_receiver(policy: Policy) -> TestReceiver {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let (event_tx, mut raw_rx) = mpsc::channel(1000);
    let bridge = ConfirmationBridge::new();

    let ctx = ReceiverContext::from_config(config.clone(), bridge.clone(), event_tx);
    let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap(), ctx)
        .await
        .unwrap();
    let addr = acceptor.local_addr().unwrap();
    let handle = acceptor.spawn();

    let (fwd_tx, events) = mpsc::unbounded_channel();
    let answering = bridge.clone();
    tokio::spawn(async move {
        while let Some(event) = raw_rx.recv().await {
            if let AppEvent::ConfirmationRequested(request) = &event {
                match policy {
                    Policy::Accept => {
                        answering.respond(request.id, true).await;
                    }
                    Policy::Reject => {
                        answering.respond(request.id, false).await;
                    }
                    Policy::Manual => {}
                }
            }
            let _ = fwd_tx.send(event);
        }
    });

    TestReceiver {
        dir,
        config,
        bridge,
        handle,
        addr,
        events,
    }
}

impl TestReceiver {
    /// Sender context sharing this receiver's key directory (same-host scenario)
    pub fn sender(&self) -> (SendContext, mpsc::Receiver<AppEvent>) {
        let (event_tx, event_rx) = mpsc::channel(10_000);
        let ctx = SendContext {
            keystore: KeyStore::from_config(&self.config),
            config: self.config.clone(),
            event_tx,
        };
        (ctx, event_rx)
    }

    pub fn write_source(&self, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let src = self.dir.path().join("outbox");
        std::fs::create_dir_all(&src).unwrap();
        let path = src.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Next status or error line matching `pred`, skipping everything else
    pub async fn wait_for_line(&mut self, pred: impl Fn(&str) -> bool) -> String {
        wait_for_line(&mut self.events, pred).await
    }
}

pub async fn wait_for_line(
    events: &mut mpsc::UnboundedReceiver<AppEvent>,
    pred: impl Fn(&str) -> bool,
) -> String {
    let found = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(event) = events.recv().await {
            match event {
                AppEvent::Status(line) | AppEvent::Error(line) if pred(&line) => return Some(line),
                _ => {}
            }
        }
        None
    })
    .await
    .expect("timed out waiting for event");
    found.expect("event channel closed")
}

/// Hand-rolled sender that stops after the approval byte; returns the stream and
/// the receiver's public key PEM
pub async fn handshake(addr: SocketAddr) -> (TcpStream, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(HANDSHAKE_TOKEN).await.unwrap();
    let pem = read_blob(&mut stream, MAX_PUBLIC_KEY_LEN).await.unwrap();
    (stream, pem)
}

/// Run the whole sender protocol by hand so the ciphertext can be tampered with
pub async fn send_crafted(
    addr: SocketAddr,
    file_name: &str,
    contents: &[u8],
    tamper: impl FnOnce(&mut Vec<u8>),
) -> TcpStream {
    let (mut stream, pem) = handshake(addr).await;
    assert_eq!(read_u8(&mut stream).await.unwrap(), 0x01);

    let key = parse_public_key(&pem).unwrap();
    let session = SessionKey::generate();
    let wrapped = asymmetric_encrypt(&session.to_bytes(), &key).unwrap();
    write_blob(&mut stream, &wrapped).await.unwrap();

    let zipped = compress_bytes(file_name, contents).unwrap();
    let mut encryptor = StreamEncryptor::new(&session);
    let mut ciphertext = encryptor.update(&pkcs7_pad(&zipped));
    ciphertext.extend(encryptor.finalize().unwrap());
    tamper(&mut ciphertext);

    let header = TransferHeader {
        file_name: file_name.to_string(),
        content_hash: content_hash(&zipped),
        payload_len: ciphertext.len() as u64,
    };
    header.write_to(&mut stream).await.unwrap();
    stream.write_all(&ciphertext).await.unwrap();
    stream.flush().await.unwrap();
    stream
}
