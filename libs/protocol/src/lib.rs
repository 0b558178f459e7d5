//! Wire protocol for the Courier bridge.
//!
//! One frame is a UTF-8 JSON object terminated by exactly one newline:
//!
//! ```text
//! {"type":"CMD","module":"core","action":"get_status","data":null,"msg_id":"abc12345"}\n
//! ```
//!
//! Commands travel control process -> broker -> module; responses, events
//! and errors travel the other way. A response or error carries the same
//! `msg_id` as the command that caused it; an event carries a fresh,
//! semantically ignorable one. JSON string escaping guarantees a payload
//! can never contain a raw newline, so the delimiter is unambiguous.

pub mod error;
pub mod message;

pub use error::ProtocolError;
pub use message::{Message, MessageType};

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
