//! Wire framing for the chat socket.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::store::StoredMessage;

/// Identifies one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque room key. For the SQLite catalog this is the community id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<i64> for RoomId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

// Clients send community ids both as strings and as numbers.
impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => RoomId(s),
            Raw::Number(n) => RoomId(n.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub username: String,
    #[serde(rename = "roomId", alias = "communityId", alias = "room_id")]
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageRequest {
    #[serde(alias = "message")]
    pub text: String,
}

/// Inbound events. `connect` and `disconnect` come from the socket itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join(JoinRequest),
    Leave,
    Message(MessageRequest),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown event {0:?}")]
    UnknownEvent(String),
}

impl ClientEvent {
    pub fn parse(frame: &str) -> Result<ClientEvent, FrameError> {
        #[derive(Deserialize)]
        struct Frame {
            event: String,
            #[serde(default)]
            data: serde_json::Value,
        }

        let Frame { event, data } = serde_json::from_str(frame)?;
        match event.as_str() {
            "join" => Ok(ClientEvent::Join(serde_json::from_value(data)?)),
            "leave" => Ok(ClientEvent::Leave),
            "message" => Ok(ClientEvent::Message(serde_json::from_value(data)?)),
            _ => Err(FrameError::UnknownEvent(event)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagePayload {
    pub sender: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub flagged: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedPayload {
    pub message_id: i64,
    pub sender: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub reason: Option<String>,
}

/// Outbound events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserJoined { username: String },
    UserLeft { username: String },
    Message(MessagePayload),
    FlaggedMessage(FlaggedPayload),
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }

    pub fn message(stored: &StoredMessage) -> Self {
        ServerEvent::Message(MessagePayload {
            sender: stored.sender.clone(),
            content: stored.content.clone(),
            timestamp: stored.timestamp,
            flagged: stored.verdict.flagged,
            reason: stored.verdict.reason.clone(),
        })
    }

    pub fn flagged(stored: &StoredMessage) -> Self {
        ServerEvent::FlaggedMessage(FlaggedPayload {
            message_id: stored.id,
            sender: stored.sender.clone(),
            content: stored.content.clone(),
            timestamp: stored.timestamp,
            reason: stored.verdict.reason.clone(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
