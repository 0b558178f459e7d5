//! Message envelope and frame codec.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Wire tags recognized in the `type` field of a frame.
const KNOWN_TYPE_TAGS: [&str; 4] = ["CMD", "RESP", "EVENT", "ERR"];

/// Kind of a message on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "CMD")]
    Command,
    #[serde(rename = "RESP")]
    Response,
    #[serde(rename = "EVENT")]
    Event,
    #[serde(rename = "ERR")]
    Error,
}

/// One unit of communication between the control process and a module.
///
/// In a `Command`, `module` names the destination; in every other type it
/// names the origin. `msg_id` is the correlation token: producers that want
/// correlation must copy the originating command's id explicitly, the
/// constructors never do it implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default = "generate_msg_id")]
    pub msg_id: String,
}

/// Short random correlation token, unique enough for in-flight commands.
pub fn generate_msg_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

impl Message {
    /// Command addressed to `module`, with a fresh correlation id
    pub fn command(
        module: impl Into<String>,
        action: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            msg_type: MessageType::Command,
            module: module.into(),
            action: action.into(),
            data,
            msg_id: generate_msg_id(),
        }
    }

    /// Response from `module`, correlated to the command carrying `msg_id`
    pub fn response(
        module: impl Into<String>,
        action: impl Into<String>,
        data: Option<Value>,
        msg_id: impl Into<String>,
    ) -> Self {
        Self {
            msg_type: MessageType::Response,
            module: module.into(),
            action: action.into(),
            data,
            msg_id: msg_id.into(),
        }
    }

    /// Unsolicited event from `module`; the id is fresh and carries no
    /// correlation meaning
    pub fn event(
        module: impl Into<String>,
        action: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            msg_type: MessageType::Event,
            module: module.into(),
            action: action.into(),
            data,
            msg_id: generate_msg_id(),
        }
    }

    /// Error from `module` with a human-readable description, correlated to
    /// the command carrying `msg_id`
    pub fn error(
        module: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
        msg_id: impl Into<String>,
    ) -> Self {
        Self {
            msg_type: MessageType::Error,
            module: module.into(),
            action: action.into(),
            data: Some(json!({ "error": description.into() })),
            msg_id: msg_id.into(),
        }
    }

    /// Encode as one wire frame, terminated by exactly one newline
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut frame = serde_json::to_string(self).map_err(ProtocolError::Parse)?;
        frame.push('\n');
        Ok(frame)
    }

    /// Decode one frame (without its trailing newline).
    ///
    /// Distinguishes a frame that is not JSON from one whose `type` tag is
    /// not a recognized discriminator.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw).map_err(ProtocolError::Parse)?;

        let tag = value.get("type").and_then(Value::as_str);
        match tag {
            Some(tag) if KNOWN_TYPE_TAGS.contains(&tag) => {}
            other => {
                return Err(ProtocolError::UnknownType {
                    tag: other.unwrap_or("<missing>").to_string(),
                })
            }
        }

        serde_json::from_value(value).map_err(ProtocolError::Parse)
    }
}
