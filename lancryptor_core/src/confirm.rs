//! Rendezvous between connection handlers and whoever answers trust questions.
//!
//! Each handler opens its own request, keyed by a fresh id, and waits on a one-shot
//! channel. The answering side (terminal prompt, UI) learns about requests through
//! [`AppEvent::ConfirmationRequested`](crate::AppEvent) and replies with
//! [`ConfirmationBridge::respond`]. Any number of requests may be pending.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{RwLock, oneshot};
pub use uuid::Uuid;

/// A trust question waiting for a human
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub fingerprint: String,
}

#[derive(Clone, Default)]
pub struct ConfirmationBridge {
    pending: Arc<RwLock<HashMap<Uuid, oneshot::Sender<bool>>>>,
}

impl ConfirmationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request and return the handle to wait on
    pub async fn open(
        &self,
        peer: SocketAddr,
        fingerprint: String,
    ) -> (ConfirmationRequest, PendingConfirmation) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        let request = ConfirmationRequest {
            id,
            peer,
            fingerprint,
        };
        let pending = PendingConfirmation {
            id,
            rx,
            bridge: self.clone(),
        };
        (request, pending)
    }

    /// Deliver an answer. Returns `false` if no request with this id is waiting.
    pub async fn respond(&self, id: Uuid, accepted: bool) -> bool {
        let tx = self.pending.write().await.remove(&id);
        match tx {
            Some(tx) => tx.send(accepted).is_ok(),
            None => false,
        }
    }

    pub async fn pending_ids(&self) -> Vec<Uuid> {
        self.pending.read().await.keys().copied().collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

/// Waiting side of one request. Dropping it withdraws the request.
pub struct PendingConfirmation {
    id: Uuid,
    rx: oneshot::Receiver<bool>,
    bridge: ConfirmationBridge,
}

impl PendingConfirmation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Block until answered. A withdrawn request counts as a rejection.
    pub async fn wait(mut self) -> bool {
        (&mut self.rx).await.unwrap_or(false)
    }
}

impl Drop for PendingConfirmation {
    fn drop(&mut self) {
        let id = self.id;
        let pending = self.bridge.pending.clone();
        // Answered requests are already gone; this only cleans up abandoned ones
        if let Ok(mut map) = pending.try_write() {
            map.remove(&id);
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pending.write().await.remove(&id);
            });
        }
    }
}
