//! Inbound channel events and frame decoding.

use serde::{Deserialize, Serialize};

use super::message::MessageRecord;

/// Outbound liveness payload.
pub const PING: &str = "ping";
/// Server reply to [`PING`]; carries no event.
pub const PONG: &str = "pong";

/// Event received over a live channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    NewMessage {
        message: MessageRecord,
    },
    MessageEdited {
        message: MessagePatch,
    },
    MessageDeleted {
        message_id: String,
    },
    Mention {
        from: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        chat_id: Option<String>,
        #[serde(default)]
        mentions: Vec<String>,
    },
    MemberJoined {
        display_name: String,
    },
    MemberKicked {
        display_name: String,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::NewMessage { .. } => "new_message",
            InboundEvent::MessageEdited { .. } => "message_edited",
            InboundEvent::MessageDeleted { .. } => "message_deleted",
            InboundEvent::Mention { .. } => "mention",
            InboundEvent::MemberJoined { .. } => "member_joined",
            InboundEvent::MemberKicked { .. } => "member_kicked",
        }
    }
}

/// Payload of `message_edited`: just enough to patch an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    pub id: String,
    pub text: String,
    /// When present, only this chat's collection is searched.
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Why a frame produced no event.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("keep-alive reply")]
    Pong,

    #[error("unrecognized event type {0:?}")]
    Unknown(String),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

const KNOWN_TYPES: [&str; 6] = [
    "new_message",
    "message_edited",
    "message_deleted",
    "mention",
    "member_joined",
    "member_kicked",
];

/// Decode one text frame. Callers drop every `Err`; the variants only exist for logging.
pub fn decode_frame(text: &str) -> Result<InboundEvent, FrameError> {
    if text.trim() == PONG {
        return Err(FrameError::Pong);
    }
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    if !KNOWN_TYPES.contains(&kind) {
        return Err(FrameError::Unknown(kind.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}
