use crate::AppEvent;
use crate::archive::compress_file;
use crate::config::AppConfig;
use crate::crypto::{
    SessionKey, StreamEncryptor, asymmetric_encrypt, content_hash, fingerprint, parse_public_key,
    pkcs7_pad,
};
use crate::error::{Result, TransferError};
use crate::keystore::KeyStore;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SendOutcome;
use super::codec::{TransferHeader, read_blob, read_u8, write_blob};
use super::constants::{APPROVE_BYTE, BUFFER_SIZE, HANDSHAKE_TOKEN, MAX_PUBLIC_KEY_LEN};
use super::utils::{report_progress, with_timeout};

/// Everything a send needs besides the target and the file
#[derive(Clone)]
pub struct SendContext {
    pub keystore: KeyStore,
    pub config: AppConfig,
    pub event_tx: mpsc::Sender<AppEvent>,
}

impl SendContext {
    async fn status(&self, msg: impl Into<String>) {
        let _ = self.event_tx.send(AppEvent::Status(msg.into())).await;
    }
}

/// Parse `ip` or `ip:port`, falling back to `default_port`
pub fn parse_target(target: &str, default_port: u16) -> Result<SocketAddr> {
    let target = target.trim();
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(addr);
    }
    target
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| TransferError::Protocol(format!("invalid target address: {}", target)))
}

/// Run one send and turn its result into exactly one status line.
///
/// The line is logged, emitted on the event channel and returned.
pub async fn send_and_report(
    target: SocketAddr,
    file: PathBuf,
    ctx: SendContext,
    cancel: CancellationToken,
) -> String {
    match send_file(target, &file, &ctx, &cancel).await {
        Ok(outcome) => {
            let msg = outcome.status_message();
            info!("Send of {:?} to {} ended: {:?}", file, target, outcome);
            ctx.status(msg.clone()).await;
            if outcome == SendOutcome::Sent {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let _ = ctx.event_tx.send(AppEvent::TransferCompleted(name)).await;
            }
            msg
        }
        Err(e) => {
            error!("Send of {:?} to {} failed: {}", file, target, e);
            let msg = e.user_message();
            let _ = ctx.event_tx.send(AppEvent::Error(msg.clone())).await;
            msg
        }
    }
}

/// Send one file to a listening receiver.
///
/// Returns `RejectedByPeer` if the human on the other side declines (or never
/// answers within the confirmation timeout), and `Cancelled` if `cancel` fires
/// while ciphertext is streaming.
pub async fn send_file(
    target: SocketAddr,
    file: &Path,
    ctx: &SendContext,
    cancel: &CancellationToken,
) -> Result<SendOutcome> {
    match tokio::fs::metadata(file).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(TransferError::FileNotFound(file.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(TransferError::FileNotFound(file.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    }
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::FileNotFound(file.to_path_buf()))?
        .to_string();

    ctx.keystore.ensure_keypair().await?;

    debug!("[{}] Connecting", target);
    let io_timeout = ctx.config.connect_timeout();
    let mut stream = match tokio::time::timeout(io_timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
            return Err(TransferError::ConnectionRefused(target.to_string()));
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(TransferError::Timeout("connecting to receiver")),
    };
    stream.set_nodelay(true)?;
    ctx.status(format!("Connected to {}", target)).await;

    debug!("[{}] Awaiting peer public key", target);
    stream.write_all(HANDSHAKE_TOKEN).await?;
    let peer_pem = with_timeout(
        io_timeout,
        "reading receiver public key",
        read_blob(&mut stream, MAX_PUBLIC_KEY_LEN),
    )
    .await?;
    let peer_key = parse_public_key(&peer_pem)?;
    let peer_fingerprint = fingerprint(&peer_pem);
    info!("[{}] Receiver key fingerprint {}", target, peer_fingerprint);
    ctx.status(format!(
        "Receiver public key hash:\n{}\nWaiting for receiver confirmation...",
        peer_fingerprint
    ))
    .await;

    debug!("[{}] Awaiting peer confirmation", target);
    let approval = tokio::time::timeout(
        ctx.config.confirmation_timeout(),
        read_u8(&mut stream),
    )
    .await;
    match approval {
        Ok(Ok(APPROVE_BYTE)) => {}
        Ok(Ok(byte)) => {
            info!("[{}] Receiver declined (byte {:#04x})", target, byte);
            return Ok(SendOutcome::RejectedByPeer);
        }
        Ok(Err(e)) => {
            info!("[{}] Connection ended before approval: {}", target, e);
            return Ok(SendOutcome::RejectedByPeer);
        }
        Err(_) => {
            warn!("[{}] No confirmation within timeout", target);
            return Ok(SendOutcome::RejectedByPeer);
        }
    }

    debug!("[{}] Encrypting and sending", target);
    let session = SessionKey::generate();
    let session_material = session.to_bytes();
    let wrapped = tokio::task::spawn_blocking(move || {
        asymmetric_encrypt(&session_material, &peer_key)
    })
    .await
    .map_err(|e| TransferError::Crypto(format!("session key task failed: {}", e)))??;
    write_blob(&mut stream, &wrapped).await?;

    let source = file.to_path_buf();
    let archive = tokio::task::spawn_blocking(move || compress_file(&source))
        .await
        .map_err(|e| TransferError::Archive(format!("compression task failed: {}", e)))??;
    let header_hash = content_hash(&archive);
    let padded = pkcs7_pad(&archive);
    drop(archive);

    let header = TransferHeader {
        file_name: file_name.clone(),
        content_hash: header_hash,
        payload_len: padded.len() as u64,
    };
    header.write_to(&mut stream).await?;

    let total = padded.len() as u64;
    let mut sent: u64 = 0;
    let mut encryptor = StreamEncryptor::new(&session);
    let start_time = Instant::now();

    for chunk in padded.chunks(BUFFER_SIZE) {
        if cancel.is_cancelled() {
            info!("[{}] Send of {} cancelled at {}/{}", target, file_name, sent, total);
            return Ok(SendOutcome::Cancelled);
        }
        let ciphertext = encryptor.update(chunk);
        stream.write_all(&ciphertext).await?;
        sent += chunk.len() as u64;
        report_progress(&ctx.event_tx, &file_name, sent, total, start_time, true).await;
    }

    let tail = encryptor.finalize()?;
    stream.write_all(&tail).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    info!(
        "[{}] Sent {} ({} bytes of ciphertext in {:.2?})",
        target,
        file_name,
        total,
        start_time.elapsed()
    );
    Ok(SendOutcome::Sent)
}
