//! Broker and worker-module runtime for the Courier bridge.
//!
//! One control process talks to this process over a single persistent
//! byte stream. The [`Broker`] owns the transport loops: a receive loop
//! that extracts newline-delimited frames and routes each command to the
//! destination module's [`Mailbox`], and a send loop draining the shared
//! outgoing queue back to the wire. Every worker module runs its own
//! dispatch task, popping its mailbox and invoking handlers from a
//! name-keyed handler table.
//!
//! Threading model: one dispatch task per module, one receive and one send
//! task for the broker, plus a bounded [`WorkerPool`] per module for
//! long-running handler work. All cross-task handoff goes through FIFO
//! queues; every bounded wait exists only so loops can poll their running
//! flag, not as application-level cancellation.

pub mod broker;
pub mod error;
pub mod mailbox;
pub mod module;
pub mod worker;

pub use broker::Broker;
pub use error::{BrokerError, HandlerError};
pub use mailbox::Mailbox;
pub use module::{HandlerResult, Module, ModuleContext, ModuleHooks};
pub use worker::{CancelFlag, WorkerPool};

use std::time::Duration;

/// Bounded wait used by every internal loop to re-check its running flag.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
