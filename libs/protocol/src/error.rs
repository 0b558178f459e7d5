//! Protocol error taxonomy.
//!
//! A malformed frame and an unrecognized type tag are distinct failures:
//! the broker drops both, but callers that surface diagnostics need to
//! tell "not JSON at all" apart from "JSON with a bad discriminator".

use thiserror::Error;

/// Errors produced while encoding or decoding wire frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not a well-formed JSON envelope
    #[error("malformed frame: {0}")]
    Parse(#[source] serde_json::Error),

    /// Frame parsed as JSON but its `type` tag is not CMD/RESP/EVENT/ERR
    #[error("unrecognized message type tag {tag:?}")]
    UnknownType { tag: String },
}
