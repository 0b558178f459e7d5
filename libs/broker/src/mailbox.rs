//! Per-module inbound mailbox.

use std::sync::Arc;
use std::time::Duration;

use protocol::Message;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::warn;

/// Unbounded FIFO of inbound messages for one module.
///
/// Created lazily on first registration and kept for the process lifetime.
/// The broker pushes from the receive loop; the owning module's dispatch
/// task is the only consumer. The handle is cheap to clone, every clone
/// points at the same queue.
#[derive(Clone)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Message>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue a message. Never blocks; the queue is unbounded.
    pub fn push(&self, message: Message) {
        // The receiver lives as long as this handle, so this only fails if
        // the runtime is tearing down.
        if self.tx.send(message).is_err() {
            warn!("mailbox closed; inbound message dropped");
        }
    }

    /// Pop the next message, waiting at most `wait`.
    ///
    /// Returns `None` on timeout so the dispatch loop can re-check its
    /// running flag.
    pub async fn recv_timeout(&self, wait: Duration) -> Option<Message> {
        let mut rx = self.rx.lock().await;
        match timeout(wait, rx.recv()).await {
            Ok(message) => message,
            Err(_elapsed) => None,
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
