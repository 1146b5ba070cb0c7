use crate::AppEvent;
use crate::archive::decompress_single;
use crate::crypto::{
    BLOCK_SIZE, SessionKey, StreamDecryptor, asymmetric_decrypt, content_hash, fingerprint,
    pkcs7_unpad,
};
use crate::error::{Result, TransferError};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ReceiveOutcome;
use super::codec::{TransferHeader, read_blob, recv_exact, write_blob};
use super::constants::{
    APPROVE_BYTE, BUFFER_SIZE, HANDSHAKE_TOKEN, MAX_SESSION_BLOB_LEN, REJECT_BYTE,
};
use super::server::ReceiverContext;
use super::utils::{open_secure_file, report_progress, sanitize_file_name, with_timeout};

/// Run one inbound connection to completion and report how it ended.
///
/// Exactly one status line (or, for a protocol mismatch, one log line) comes out of
/// every connection. Errors stay here; the accept loop never sees them.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    ctx: ReceiverContext,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = handle_connection(&mut stream, peer, &ctx, &cancel).await;
    let _ = stream.shutdown().await;

    match result {
        Ok(outcome) => {
            info!("[{}] Connection ended: {:?}", peer, outcome);
            if let ReceiveOutcome::Received { file_name, .. } = &outcome {
                let _ = ctx
                    .event_tx
                    .send(AppEvent::TransferCompleted(file_name.clone()))
                    .await;
            }
            if let Some(msg) = outcome.status_message() {
                let _ = ctx.event_tx.send(AppEvent::Status(msg)).await;
            }
        }
        Err(e) => {
            error!("[{}] Connection failed: {}", peer, e);
            let _ = ctx.event_tx.send(AppEvent::Error(e.user_message())).await;
        }
    }
}

/// Receiver side of the protocol for one connection.
///
/// Nothing is written to the received directory unless the payload unpads cleanly
/// and its SHA-256 matches the header.
pub async fn handle_connection<S>(
    stream: &mut S,
    peer: SocketAddr,
    ctx: &ReceiverContext,
    cancel: &CancellationToken,
) -> Result<ReceiveOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let read_timeout = ctx.config.read_timeout();

    debug!("[{}] Awaiting handshake request", peer);
    let token = match with_timeout(
        read_timeout,
        "waiting for handshake",
        recv_exact(stream, HANDSHAKE_TOKEN.len()),
    )
    .await
    {
        Ok(token) => token,
        Err(TransferError::ConnectionLost) => {
            debug!("[{}] Closed before sending a handshake", peer);
            return Ok(ReceiveOutcome::ProtocolMismatch);
        }
        Err(e) => return Err(e),
    };
    if token != HANDSHAKE_TOKEN {
        warn!("[{}] Unexpected handshake token, closing", peer);
        return Ok(ReceiveOutcome::ProtocolMismatch);
    }

    debug!("[{}] Sending own public key", peer);
    let public_pem = ctx.keystore.load_public_key_pem().await?;
    write_blob(stream, &public_pem).await?;
    stream.flush().await?;
    let own_fingerprint = fingerprint(&public_pem);

    debug!("[{}] Awaiting human confirmation", peer);
    let _ = ctx
        .event_tx
        .send(AppEvent::Status(format!(
            "Connection from {} - Confirm receiver key:\n{}",
            peer.ip(),
            own_fingerprint
        )))
        .await;
    let (request, pending) = ctx.bridge.open(peer, own_fingerprint).await;
    let _ = ctx
        .event_tx
        .send(AppEvent::ConfirmationRequested(request))
        .await;

    let accepted = tokio::select! {
        answer = pending.wait() => answer,
        _ = cancel.cancelled() => {
            info!("[{}] Receiver stopping, treating pending confirmation as rejected", peer);
            false
        }
    };

    if !accepted {
        debug!("[{}] Sending rejection", peer);
        stream.write_all(&[REJECT_BYTE]).await?;
        stream.flush().await?;
        return Ok(ReceiveOutcome::Rejected);
    }

    debug!("[{}] Sending approval", peer);
    stream.write_all(&[APPROVE_BYTE]).await?;
    stream.flush().await?;

    debug!("[{}] Awaiting session key", peer);
    let wrapped = with_timeout(
        read_timeout,
        "reading session key",
        read_blob(stream, MAX_SESSION_BLOB_LEN),
    )
    .await?;
    let private_key = ctx.keystore.load_private_key().await?;
    let material = tokio::task::spawn_blocking(move || asymmetric_decrypt(&wrapped, &private_key))
        .await
        .map_err(|e| TransferError::Crypto(format!("session key task failed: {}", e)))??;
    let session = SessionKey::from_bytes(&material)?;

    let header = with_timeout(
        read_timeout,
        "reading file header",
        TransferHeader::read_from(stream),
    )
    .await?;
    let max_payload = ctx.config.max_payload_bytes;
    if header.payload_len == 0 || header.payload_len % BLOCK_SIZE as u64 != 0 {
        return Err(TransferError::Protocol(format!(
            "payload length {} is not a positive multiple of the block size",
            header.payload_len
        )));
    }
    if header.payload_len > max_payload {
        return Err(TransferError::Protocol(format!(
            "payload of {} bytes exceeds limit of {}",
            header.payload_len, max_payload
        )));
    }
    let display_name = sanitize_file_name(&header.file_name);
    info!(
        "[{}] Receiving {} ({} encrypted bytes)",
        peer, display_name, header.payload_len
    );

    debug!("[{}] Receiving and decrypting", peer);
    let total = header.payload_len;
    let mut received: u64 = 0;
    let mut decryptor = StreamDecryptor::new(&session);
    let mut plaintext = Vec::with_capacity(total.min(64 * 1024 * 1024) as usize);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let start_time = Instant::now();

    while received < total {
        let want = (total - received).min(BUFFER_SIZE as u64) as usize;
        let n = tokio::select! {
            read = tokio::time::timeout(read_timeout, stream.read(&mut buffer[..want])) => {
                match read {
                    Ok(res) => res?,
                    Err(_) => return Err(TransferError::Timeout("receiving file data")),
                }
            }
            _ = cancel.cancelled() => {
                info!("[{}] Receive of {} stopped at {}/{}", peer, display_name, received, total);
                return Ok(ReceiveOutcome::Cancelled);
            }
        };
        if n == 0 {
            return Err(TransferError::ConnectionLost);
        }
        received += n as u64;
        plaintext.extend_from_slice(&decryptor.update(&buffer[..n]));
        report_progress(&ctx.event_tx, &display_name, received, total, start_time, false).await;
    }
    plaintext.extend_from_slice(&decryptor.finalize()?);

    debug!("[{}] Verifying integrity", peer);
    let archive = match pkcs7_unpad(&plaintext) {
        Ok(archive) => archive,
        Err(e) => {
            warn!("[{}] {}", peer, e);
            return Ok(ReceiveOutcome::IntegrityFailed);
        }
    };
    drop(plaintext);
    let actual = content_hash(&archive);
    debug!("[{}] Expected hash: {}", peer, hex::encode(header.content_hash));
    debug!("[{}] Actual hash:   {}", peer, hex::encode(actual));
    if actual != header.content_hash {
        warn!("[{}] File integrity check failed for {}", peer, display_name);
        return Ok(ReceiveOutcome::IntegrityFailed);
    }

    debug!("[{}] Extracting", peer);
    let file = tokio::task::spawn_blocking(move || decompress_single(&archive, max_payload))
        .await
        .map_err(|e| TransferError::Archive(format!("extraction task failed: {}", e)))??;
    let file_name = sanitize_file_name(&file.name);

    tokio::fs::create_dir_all(&ctx.received_dir).await?;
    let path = ctx.received_dir.join(&file_name);
    let mut out = open_secure_file(&path).await?;
    out.write_all(&file.contents).await?;
    out.flush().await?;

    info!(
        "[{}] Saved {} ({} bytes) to {:?} in {:.2?}",
        peer,
        file_name,
        file.contents.len(),
        path,
        start_time.elapsed()
    );
    Ok(ReceiveOutcome::Received { file_name, path })
}
