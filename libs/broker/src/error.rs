//! Broker and handler error types.

use thiserror::Error;

/// Broker lifecycle errors.
///
/// Transport failures never surface here: a dead read ends the session and
/// a failed write drops one message, both handled inside the loops.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// `start` was called twice without an intervening `stop`, or after the
    /// session already ran. One session per process; no retry.
    #[error("broker transport loops already started")]
    AlreadyStarted,
}

/// Failure raised by a command handler.
///
/// These never cross the module/broker boundary as raw errors; the dispatch
/// loop converts them into structured `ERR` frames carrying the original
/// correlation id.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Handler-specific failure with a human-readable description
    #[error("{0}")]
    Failed(String),

    /// The module's bounded worker pool has no free slot
    #[error("worker pool exhausted")]
    WorkersBusy,

    /// Payload was missing a field or had the wrong shape
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl HandlerError {
    pub fn failed(description: impl Into<String>) -> Self {
        Self::Failed(description.into())
    }
}
