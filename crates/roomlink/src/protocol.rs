//! Wire protocol: one JSON object per text frame.

use serde::{Deserialize, Serialize};

use crate::Error;

// ---------------------------------------------------------------------------
// Reserved actions
// ---------------------------------------------------------------------------

pub mod action {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const PUBLISH: &str = "publish";
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A decoded protocol frame.
///
/// `action` is mandatory; a frame without it fails to decode. Fields other
/// than `action`, `room` and `payload` are kept in `extra` so handlers see the
/// whole object the remote sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Frame {
    /// A bare frame carrying only an action.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            room: None,
            payload: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn ping() -> Self {
        Self::new(action::PING)
    }

    pub fn subscribe(room: &str) -> Self {
        Self::new(action::SUBSCRIBE).with_room(room)
    }

    pub fn unsubscribe(room: &str) -> Self {
        Self::new(action::UNSUBSCRIBE).with_room(room)
    }

    pub fn publish(room: &str, payload: serde_json::Value) -> Self {
        Self::new(action::PUBLISH)
            .with_room(room)
            .with_payload(payload)
    }
}

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

pub fn encode_frame(frame: &Frame) -> crate::Result<String> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_frame(text: &str) -> crate::Result<Frame> {
    serde_json::from_str(text).map_err(Error::Decode)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
