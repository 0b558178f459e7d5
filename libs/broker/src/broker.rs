//! Process-wide message router.
//!
//! Owns the module registry, the shared outgoing queue and the two
//! transport loops. Constructed once at startup inside the application
//! context; the handle is cheap to clone and every clone points at the
//! same broker. There is no global instance.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use protocol::{Message, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::BrokerError;
use crate::mailbox::Mailbox;
use crate::POLL_INTERVAL;

/// Central router between the control-process socket and module mailboxes.
#[derive(Clone)]
pub struct Broker {
    /// Registered module mailboxes, keyed by module name
    modules: Arc<Mutex<HashMap<String, Mailbox>>>,

    /// Producer side of the shared outgoing queue. Unbounded: a stalled
    /// peer grows this without limit, an accepted tradeoff of the design.
    outgoing_tx: mpsc::UnboundedSender<Message>,

    /// Consumer side, taken exactly once by the send loop
    outgoing_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Message>>>>,

    /// Observed by both transport loops at their next bounded wait
    running: Arc<AtomicBool>,
}

impl Broker {
    pub fn new() -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            modules: Arc::new(Mutex::new(HashMap::new())),
            outgoing_tx,
            outgoing_rx: Arc::new(Mutex::new(Some(outgoing_rx))),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a module and get its dedicated mailbox.
    ///
    /// Idempotent: the first call for a name creates the mailbox, later
    /// calls return a handle to the same queue. Mailboxes are never removed
    /// for the process lifetime.
    pub fn register(&self, module_name: &str) -> Mailbox {
        let mut modules = self.modules.lock();
        modules
            .entry(module_name.to_string())
            .or_insert_with(|| {
                info!(module = module_name, "registered module");
                Mailbox::new()
            })
            .clone()
    }

    /// Names of all registered modules
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind the broker to a live bidirectional stream and spawn the
    /// receive and send loops.
    ///
    /// Calling this twice without an intervening [`stop`](Self::stop) is a
    /// usage error, as is starting a second session after the first one
    /// ended: one connection per process lifetime.
    pub fn start<S>(&self, stream: S) -> Result<(), BrokerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadyStarted);
        }
        let outgoing_rx = match self.outgoing_rx.lock().take() {
            Some(rx) => rx,
            None => {
                // A previous session already consumed the queue.
                self.running.store(false, Ordering::SeqCst);
                return Err(BrokerError::AlreadyStarted);
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        tokio::spawn(self.clone().receive_loop(read_half));
        tokio::spawn(self.clone().send_loop(outgoing_rx, write_half));

        info!("message broker started");
        Ok(())
    }

    /// Flip the running flag; both loops exit at their next bounded wait.
    /// Does not close the connection itself.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("message broker stopped");
        }
    }

    /// Non-blocking enqueue onto the shared outgoing queue.
    pub fn submit(&self, message: Message) {
        if self.outgoing_tx.send(message).is_err() {
            warn!("outgoing queue closed; message dropped");
        }
    }

    /// Parse one raw frame and deliver it.
    ///
    /// A registered destination gets the message pushed onto its mailbox.
    /// An unknown destination gets an `unknown_module` error synthesized
    /// with the original correlation id. A malformed frame is dropped and
    /// logged; no NACK is sent.
    pub fn route(&self, raw_frame: &str) {
        let message = match Message::decode(raw_frame) {
            Ok(message) => message,
            Err(err @ ProtocolError::Parse(_)) => {
                warn!(error = %err, "dropping malformed frame");
                return;
            }
            Err(err @ ProtocolError::UnknownType { .. }) => {
                warn!(error = %err, "dropping frame with unrecognized type");
                return;
            }
        };

        let mailbox = self.modules.lock().get(&message.module).cloned();
        match mailbox {
            Some(mailbox) => {
                debug!(
                    module = %message.module,
                    action = %message.action,
                    msg_id = %message.msg_id,
                    "routed inbound message"
                );
                mailbox.push(message);
            }
            None => {
                warn!(module = %message.module, "message for unknown module");
                self.submit(Message::error(
                    message.module.clone(),
                    "unknown_module",
                    format!("module '{}' is not registered", message.module),
                    message.msg_id,
                ));
            }
        }
    }

    /// Receive loop: accumulate raw reads, extract newline-terminated
    /// frames and route each. An empty read or a connection reset ends the
    /// session and stops the broker; transient errors are logged and the
    /// loop continues while running.
    async fn receive_loop<R>(self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 4096];
        let mut buffer: Vec<u8> = Vec::with_capacity(4096);

        while self.is_running() {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    info!("peer closed connection");
                    break;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let frame: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&frame[..pos]);
                        let line = line.trim();
                        if !line.is_empty() {
                            self.route(line);
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::ConnectionReset => {
                    warn!("connection reset by peer");
                    break;
                }
                Err(err) => {
                    if !self.is_running() {
                        break;
                    }
                    warn!(error = %err, "receive error");
                }
            }
        }

        // Transport termination is fatal to the session, not the process.
        self.stop();
        debug!("receive loop exited");
    }

    /// Send loop: bounded-wait pop on the outgoing queue, serialize, one
    /// blocking write. A write failure drops that message only.
    async fn send_loop<W>(
        self,
        mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
        mut writer: W,
    ) where
        W: AsyncWrite + Unpin,
    {
        while self.is_running() {
            let message = match timeout(POLL_INTERVAL, outgoing_rx.recv()).await {
                Err(_elapsed) => continue,
                Ok(None) => break,
                Ok(Some(message)) => message,
            };

            let frame = match message.encode() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "unencodable message dropped");
                    continue;
                }
            };

            if let Err(err) = writer.write_all(frame.as_bytes()).await {
                warn!(
                    error = %err,
                    module = %message.module,
                    action = %message.action,
                    "write failed; message dropped"
                );
                continue;
            }
            let _ = writer.flush().await;
            debug!(
                module = %message.module,
                action = %message.action,
                "sent outbound message"
            );
        }
        debug!("send loop exited");
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Broker {
    /// Test-only: consume the outgoing queue directly, in place of a send
    /// loop bound to a stream.
    pub(crate) fn take_outgoing_for_test(&self) -> mpsc::UnboundedReceiver<Message> {
        self.outgoing_rx
            .lock()
            .take()
            .expect("outgoing queue already taken")
    }
}
