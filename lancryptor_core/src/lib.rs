use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod archive;
pub mod config;
pub mod confirm;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod transfer;

use config::AppConfig;
use confirm::{ConfirmationBridge, ConfirmationRequest};
use keystore::KeyStore;
use transfer::{Acceptor, ReceiverContext, ReceiverHandle, SendContext};

//Struct command from UI to Core
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Start listening for incoming files on the configured port
    StartReceiver,
    StopReceiver,
    /// Send one file; `target_ip` may carry a `:port` suffix
    SendFile { target_ip: String, file: PathBuf },
    /// Abort every send currently streaming
    CancelTransfer,
    /// Answer a pending fingerprint confirmation
    RespondConfirmation { request_id: Uuid, accepted: bool },
}

//Struct report from Core to UI
#[derive(Debug, Clone)]
pub enum AppEvent {
    Status(String),

    TransferProgress {
        file_name: String,
        progress: f32,
        /// Human-readable rate, e.g. `2.5 KB/s`
        speed: String,
        is_sending: bool,
    },

    /// Receiver: a human must compare this fingerprint with the sender's screen
    /// and answer with [`AppCommand::RespondConfirmation`] (or directly on the bridge)
    ConfirmationRequested(ConfirmationRequest),

    TransferCompleted(String),
    Error(String),

    ReceiverStarted {
        port: u16,
    },
    ReceiverStopped,
}

pub async fn run_backend(cmd_rx: mpsc::Receiver<AppCommand>, event_tx: mpsc::Sender<AppEvent>) {
    run_backend_with(AppConfig::load(), cmd_rx, event_tx).await;
}

/// Command loop driven by a UI. Returns once the command channel closes, after
/// stopping the receiver if it is running.
pub async fn run_backend_with(
    config: AppConfig,
    mut cmd_rx: mpsc::Receiver<AppCommand>,
    event_tx: mpsc::Sender<AppEvent>,
) {
    let bridge = ConfirmationBridge::new();
    let keystore = KeyStore::from_config(&config);
    let mut receiver: Option<ReceiverHandle> = None;
    // Parent of every send's token; replaced after each cancel
    let mut send_cancel = CancellationToken::new();

    let _ = event_tx
        .send(AppEvent::Status(format!(
            "Keys in {:?}, received files go to {:?}",
            config.key_dir, config.received_dir
        )))
        .await;

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            AppCommand::StartReceiver => {
                if receiver.as_ref().is_some_and(|r| r.is_running()) {
                    let _ = event_tx
                        .send(AppEvent::Status("Receiver already running.".to_string()))
                        .await;
                    continue;
                }

                let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
                let ctx = ReceiverContext {
                    keystore: keystore.clone(),
                    bridge: bridge.clone(),
                    event_tx: event_tx.clone(),
                    received_dir: config.received_dir.clone(),
                    config: config.clone(),
                };
                match Acceptor::bind(addr, ctx).await {
                    Ok(acceptor) => receiver = Some(acceptor.spawn()),
                    Err(e) => {
                        tracing::error!("Failed to start receiver on {}: {}", addr, e);
                        let _ = event_tx
                            .send(AppEvent::Error(format!("❌ Network error: {}", e)))
                            .await;
                    }
                }
            }
            AppCommand::StopReceiver => match receiver.take() {
                Some(handle) => {
                    handle.stop();
                    handle.join().await;
                }
                None => {
                    let _ = event_tx
                        .send(AppEvent::Status("Receiver not running".to_string()))
                        .await;
                }
            },
            AppCommand::SendFile { target_ip, file } => {
                let target = match transfer::parse_target(&target_ip, config.port) {
                    Ok(addr) => addr,
                    Err(e) => {
                        let _ = event_tx
                            .send(AppEvent::Error(format!("Invalid address: {}", e)))
                            .await;
                        continue;
                    }
                };
                tracing::info!("Initiating transfer of {:?} to {}", file, target);

                let ctx = SendContext {
                    keystore: keystore.clone(),
                    config: config.clone(),
                    event_tx: event_tx.clone(),
                };
                let cancel = send_cancel.child_token();
                tokio::spawn(transfer::send_and_report(target, file, ctx, cancel));
            }
            AppCommand::CancelTransfer => {
                send_cancel.cancel();
                send_cancel = CancellationToken::new();
                let _ = event_tx
                    .send(AppEvent::Status("Task cancelled.".to_string()))
                    .await;
            }
            AppCommand::RespondConfirmation {
                request_id,
                accepted,
            } => {
                if !bridge.respond(request_id, accepted).await {
                    let _ = event_tx
                        .send(AppEvent::Error(format!(
                            "No pending confirmation with id {}",
                            request_id
                        )))
                        .await;
                }
            }
        }
    }

    if let Some(handle) = receiver.take() {
        handle.stop();
        handle.join().await;
    }
}
