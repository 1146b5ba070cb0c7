use crate::AppEvent;
use crate::config::AppConfig;
use crate::confirm::ConfirmationBridge;
use crate::error::Result;
use crate::keystore::KeyStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::receiver::serve_connection;
use super::utils::local_lan_ip;

/// Shared state handed to every connection handler
#[derive(Clone)]
pub struct ReceiverContext {
    pub keystore: KeyStore,
    pub bridge: ConfirmationBridge,
    pub event_tx: mpsc::Sender<AppEvent>,
    pub received_dir: PathBuf,
    pub config: AppConfig,
}

impl ReceiverContext {
    pub fn from_config(
        config: AppConfig,
        bridge: ConfirmationBridge,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            keystore: KeyStore::from_config(&config),
            received_dir: config.received_dir.clone(),
            bridge,
            event_tx,
            config,
        }
    }
}

/// A bound listener that has not started accepting yet
pub struct Acceptor {
    listener: TcpListener,
    ctx: ReceiverContext,
}

impl Acceptor {
    /// Make sure our keypair exists, then bind `addr`
    pub async fn bind(addr: SocketAddr, ctx: ReceiverContext) -> Result<Self> {
        ctx.keystore.ensure_keypair().await?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the accept loop on its own task
    pub fn spawn(self) -> ReceiverHandle {
        let cancel = CancellationToken::new();
        let local_addr = self.listener.local_addr().ok();
        let task = tokio::spawn(self.run(cancel.clone()));
        ReceiverHandle {
            cancel,
            task,
            local_addr,
        }
    }

    async fn run(self, cancel: CancellationToken) {
        let Acceptor { listener, ctx } = self;
        let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();

        let listening = format!("Listening for incoming files on {}:{}...", local_lan_ip(), port);
        tracing::info!("{}", listening);
        let _ = ctx.event_tx.send(AppEvent::ReceiverStarted { port }).await;
        let _ = ctx.event_tx.send(AppEvent::Status(listening)).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!("Accepted connection from {}", peer);
                        let _ = stream.set_nodelay(true);
                        let ctx = ctx.clone();
                        let conn_cancel = cancel.child_token();
                        tokio::spawn(serve_connection(stream, peer, ctx, conn_cancel));
                    }
                    Err(e) => {
                        tracing::error!("Accept failed: {}", e);
                        // Back off on fd exhaustion
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        drop(listener);
        tracing::info!("Receiver on port {} stopped", port);
        let _ = ctx
            .event_tx
            .send(AppEvent::Status("Receiver stopped.".to_string()))
            .await;
        let _ = ctx.event_tx.send(AppEvent::ReceiverStopped).await;
    }
}

/// Control side of a running accept loop
pub struct ReceiverHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    local_addr: Option<SocketAddr>,
}

impl ReceiverHandle {
    /// Stop accepting and abort in-flight handlers at their next checkpoint.
    /// Pending confirmations are answered as rejected.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait for the accept loop to exit; the listening socket is closed by then
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Receiver task ended abnormally: {}", e);
        }
    }
}
