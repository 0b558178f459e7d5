//! Worker-module base contract.
//!
//! A module owns a mailbox, a name-keyed handler table, one dispatch task
//! and a bounded worker pool. Concrete modules wire domain handlers into
//! this skeleton and hook setup/teardown through [`ModuleHooks`]; the core
//! never inspects a module's internal state beyond the handler table and
//! those two hooks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use protocol::{Message, MessageType};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::error::HandlerError;
use crate::mailbox::Mailbox;
use crate::worker::{WorkerPool, DEFAULT_WORKER_LIMIT};
use crate::POLL_INTERVAL;

/// What a handler produces: `Some(payload)` emits a response with the
/// command's correlation id, `None` emits nothing, `Err` emits a structured
/// error frame.
pub type HandlerResult = Result<Option<Value>, HandlerError>;

/// Stored handler: a closure from the inbound command to a future of its
/// outcome. Plain function values, no downcasting.
type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Module-specific lifecycle hooks.
///
/// `on_start` runs after the dispatch task is already polling; failures in
/// it are the module's own responsibility and are only logged. `on_stop`
/// undoes standing side effects (stops spoofing, restores tables, ...).
#[async_trait]
pub trait ModuleHooks: Send + Sync {
    async fn on_start(&self, _ctx: &ModuleContext) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn on_stop(&self, _ctx: &ModuleContext) {}
}

/// Hooks for modules with no setup or teardown
struct NoHooks;

#[async_trait]
impl ModuleHooks for NoHooks {}

/// Handle a module hands to its handlers and worker tasks.
///
/// Cloneable and usable from any task: this is how long-running background
/// work reports progress without blocking the dispatch loop.
#[derive(Clone)]
pub struct ModuleContext {
    name: Arc<str>,
    broker: Broker,
    workers: WorkerPool,
}

impl ModuleContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Emit an unsolicited event with a fresh correlation id.
    pub fn emit_event(&self, action: &str, data: Option<Value>) {
        self.broker
            .submit(Message::event(self.name.as_ref(), action, data));
    }

    /// Emit a response correlated to the command carrying `msg_id`.
    pub fn emit_response(&self, action: &str, data: Option<Value>, msg_id: impl Into<String>) {
        self.broker
            .submit(Message::response(self.name.as_ref(), action, data, msg_id));
    }

    /// Emit a structured error correlated to the command carrying `msg_id`.
    pub fn emit_error(&self, description: impl Into<String>, msg_id: impl Into<String>) {
        self.broker.submit(Message::error(
            self.name.as_ref(),
            "error",
            description,
            msg_id,
        ));
    }

    /// Spawn long-running work onto the module's bounded pool.
    ///
    /// Fails fast with [`HandlerError::WorkersBusy`] on exhaustion, which a
    /// handler surfaces as an error frame instead of queueing silently.
    pub fn spawn_worker<F>(&self, work: F) -> Result<(), HandlerError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.workers.try_spawn(work)
    }

    /// Free slots in the worker pool
    pub fn workers_available(&self) -> usize {
        self.workers.available()
    }
}

/// Generic worker-module skeleton.
pub struct Module {
    ctx: ModuleContext,
    mailbox: Mailbox,
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
    hooks: Arc<dyn ModuleHooks>,
    running: Arc<AtomicBool>,
}

impl Module {
    /// Construct a module and register its mailbox with the broker.
    ///
    /// Registration happens here, before `start` is ever called, so frames
    /// arriving early queue up instead of bouncing as `unknown_module`.
    pub fn new(name: &str, broker: Broker) -> Self {
        let mailbox = broker.register(name);
        Self {
            ctx: ModuleContext {
                name: Arc::from(name),
                broker,
                workers: WorkerPool::new(DEFAULT_WORKER_LIMIT),
            },
            mailbox,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            hooks: Arc::new(NoHooks),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach lifecycle hooks
    pub fn hooks(mut self, hooks: Arc<dyn ModuleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Override the bounded worker pool size
    pub fn worker_limit(mut self, limit: usize) -> Self {
        self.ctx.workers = WorkerPool::new(limit);
        self
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Clone of this module's context, for handlers and tests
    pub fn context(&self) -> ModuleContext {
        self.ctx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Store a handler under an action name. Re-registration overwrites
    /// silently.
    pub fn register_handler<F, Fut>(&self, action: &str, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |message| handler(message).boxed());
        self.handlers.write().insert(action.to_string(), handler);
        debug!(module = self.name(), action, "registered handler");
    }

    /// Start the dispatch task, then run `on_start`.
    ///
    /// Idempotent: a second call without an intervening `stop` leaves the
    /// single existing dispatch task in place. The dispatch task may begin
    /// polling before `on_start` finishes.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(dispatch_loop(
            self.ctx.clone(),
            self.mailbox.clone(),
            Arc::clone(&self.handlers),
            Arc::clone(&self.running),
        ));
        info!(module = self.name(), "module started");

        if let Err(err) = self.hooks.on_start(&self.ctx).await {
            error!(module = self.name(), error = %err, "on_start failed");
        }
    }

    /// Clear running, run `on_stop`; the dispatch task exits on its next
    /// bounded mailbox poll.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.hooks.on_stop(&self.ctx).await;
        info!(module = self.name(), "module stopped");
    }
}

/// Per-module dispatch loop: pop the mailbox with a bounded wait, invoke
/// the handler, convert its outcome into a response or error frame.
///
/// Handler failures are caught at this boundary; the loop itself never
/// terminates because of one.
async fn dispatch_loop(
    ctx: ModuleContext,
    mailbox: Mailbox,
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let Some(message) = mailbox.recv_timeout(POLL_INTERVAL).await else {
            continue;
        };

        if message.msg_type != MessageType::Command {
            debug!(
                module = ctx.name(),
                action = %message.action,
                "ignoring non-command message"
            );
            continue;
        }

        debug!(module = ctx.name(), action = %message.action, "handling command");

        let handler = handlers.read().get(&message.action).cloned();
        let Some(handler) = handler else {
            warn!(module = ctx.name(), action = %message.action, "no handler for action");
            ctx.broker().submit(Message::error(
                ctx.name(),
                "unknown_action",
                format!("no handler for action '{}'", message.action),
                message.msg_id,
            ));
            continue;
        };

        let action = message.action.clone();
        let msg_id = message.msg_id.clone();
        match handler(message).await {
            Ok(Some(data)) => ctx.emit_response(&action, Some(data), msg_id),
            Ok(None) => {}
            Err(err) => {
                warn!(module = ctx.name(), action = %action, error = %err, "handler failed");
                ctx.emit_error(err.to_string(), msg_id);
            }
        }
    }
    debug!(module = ctx.name(), "dispatch loop exited");
}
