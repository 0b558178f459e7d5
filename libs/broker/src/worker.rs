//! Bounded per-module worker pool and cooperative cancellation.
//!
//! Handlers whose work exceeds a trivial duration must not run inside the
//! dispatch loop. They spawn onto this pool, return a `started`
//! acknowledgement immediately, and report outcomes through events. The
//! pool is bounded so a flood of commands cannot spawn threads without
//! limit; exhaustion fails fast instead of queueing.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::HandlerError;

/// Default number of concurrent background workers per module.
pub const DEFAULT_WORKER_LIMIT: usize = 8;

/// Semaphore-backed pool of background worker tasks for one module.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Spawn a background worker, failing fast when the pool is exhausted.
    ///
    /// The permit is held for the lifetime of the worker task and released
    /// when it completes.
    pub fn try_spawn<F>(&self, work: F) -> Result<(), HandlerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| HandlerError::WorkersBusy)?;
        tokio::spawn(async move {
            let _permit = permit;
            work.await;
        });
        debug!(available = self.available(), limit = self.limit, "worker spawned");
        Ok(())
    }

    /// Free worker slots right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_LIMIT)
    }
}

/// Cooperative cancellation flag shared between a handler and the worker
/// tasks it spawned.
///
/// Workers poll [`is_cancelled`](Self::is_cancelled) at their own defined
/// points; there is no preemptive kill, so a worker blocked inside a long
/// call cannot be interrupted mid-call.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the flag so the next operation can reuse it.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
