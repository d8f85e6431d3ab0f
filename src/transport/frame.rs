//! Wire frames
//!
//! Every frame is one JSON object on its own line, tagged by `type`. Inbound
//! frames (`subscribe`, `unsubscribe`, `publish`, `ping`) are parsed once here;
//! `message` and `pong` are only ever produced by the broker. Unknown fields
//! are ignored so clients may attach extra metadata (`qos`, `client_id`, ...).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Subscribe {
        #[serde(default)]
        topic: String,
    },
    Unsubscribe {
        #[serde(default)]
        topic: String,
    },
    Publish {
        #[serde(default)]
        topic: String,
        payload: String,
        #[serde(default)]
        retain: bool,
    },
    Ping {},
    Message {
        topic: String,
        payload: String,
        timestamp: String,
        from_client: String,
    },
    Pong {
        timestamp: String,
    },
}

const FRAME_TYPES: [&str; 6] = ["subscribe", "unsubscribe", "publish", "ping", "message", "pong"];

#[derive(Debug)]
pub enum FrameError {
    /// Not JSON, not an object, or a required field is missing/mistyped
    Malformed(serde_json::Error),
    /// A JSON object without a string `type` field
    MissingType,
    /// `type` is not one of the known frame types
    UnknownType(String),
    Encode(serde_json::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
            Self::MissingType => write!(f, "frame has no type"),
            Self::UnknownType(t) => write!(f, "unknown frame type: {t}"),
            Self::Encode(e) => write!(f, "failed to encode frame: {e}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Malformed(e) | Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl Frame {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self::Unsubscribe {
            topic: topic.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, payload: impl Into<String>, retain: bool) -> Self {
        Self::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }

    pub fn ping() -> Self {
        Self::Ping {}
    }

    pub fn pong(timestamp: impl Into<String>) -> Self {
        Self::Pong {
            timestamp: timestamp.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Publish { .. } => "publish",
            Self::Ping {} => "ping",
            Self::Message { .. } => "message",
            Self::Pong { .. } => "pong",
        }
    }
}

/// Parse one line (newline already stripped) into a frame.
pub fn decode(line: &str) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_str(line).map_err(FrameError::Malformed)?;

    match value.get("type").and_then(Value::as_str) {
        Some(kind) if FRAME_TYPES.contains(&kind) => {}
        Some(kind) => return Err(FrameError::UnknownType(kind.to_string())),
        None => return Err(FrameError::MissingType),
    }

    serde_json::from_value(value).map_err(FrameError::Malformed)
}

/// Serialize a frame to a single line, without the trailing newline.
pub fn encode(frame: &Frame) -> Result<String, FrameError> {
    serde_json::to_string(frame).map_err(FrameError::Encode)
}
