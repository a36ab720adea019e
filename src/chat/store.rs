use std::future::Future;

use time::OffsetDateTime;

use super::{event::RoomId, moderation::Verdict};
use crate::db::{from_micros, to_micros, SqliteStore};

/// A message accepted by the relay, before the store assigns id and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room: RoomId,
    pub sender: String,
    pub content: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub room: RoomId,
    pub sender: String,
    pub content: String,
    pub timestamp: OffsetDateTime,
    pub verdict: Verdict,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no such room {0}")]
    UnknownRoom(RoomId),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Append-only chat log. Timestamps never go backwards within a room.
pub trait MessageStore: Send + Sync {
    fn append(&self, message: NewMessage) -> impl Future<Output = Result<StoredMessage, StoreError>> + Send;

    /// Messages of one room, oldest first.
    fn history(&self, room: &RoomId) -> impl Future<Output = Result<Vec<StoredMessage>, StoreError>> + Send;
}

/// Knows which rooms exist.
pub trait CommunityCatalog: Send + Sync {
    /// The canonical id of the room `room` names, or `None` if there is no such room.
    /// Every spelling of one room resolves to the same id.
    fn resolve(&self, room: &RoomId) -> impl Future<Output = Result<Option<RoomId>, StoreError>> + Send;
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    community_id: i64,
    sender: String,
    content: String,
    timestamp: i64,
    flagged: bool,
    flag_reason: Option<String>,
}

impl From<MessageRow> for StoredMessage {
    fn from(row: MessageRow) -> Self {
        StoredMessage {
            id: row.id,
            room: RoomId::from(row.community_id),
            sender: row.sender,
            content: row.content,
            timestamp: from_micros(row.timestamp),
            verdict: Verdict { flagged: row.flagged, reason: row.flag_reason },
        }
    }
}

fn community_id(room: &RoomId) -> Option<i64> {
    room.as_str().parse().ok()
}

impl MessageStore for SqliteStore {
    async fn append(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let community_id = community_id(&message.room)
            .ok_or_else(|| StoreError::UnknownRoom(message.room.clone()))?;

        // Clamped to the room's latest timestamp so the log never runs backwards.
        let (id, timestamp): (i64, i64) = sqlx::query_as(
            "INSERT INTO messages (community_id,sender,content,timestamp,flagged,flag_reason)
             VALUES (?1,?2,?3,MAX(?4,COALESCE((SELECT MAX(timestamp) FROM messages WHERE community_id=?1),0)),?5,?6)
             RETURNING id,timestamp",
        )
        .bind(community_id)
        .bind(&message.sender)
        .bind(&message.content)
        .bind(to_micros(OffsetDateTime::now_utc()))
        .bind(message.verdict.flagged)
        .bind(message.verdict.reason.as_deref())
        .fetch_one(&self.db_pool)
        .await?;

        Ok(StoredMessage {
            id,
            room: message.room,
            sender: message.sender,
            content: message.content,
            timestamp: from_micros(timestamp),
            verdict: message.verdict,
        })
    }

    async fn history(&self, room: &RoomId) -> Result<Vec<StoredMessage>, StoreError> {
        let Some(community_id) = community_id(room) else {
            return Ok(Vec::new());
        };

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,community_id,sender,content,timestamp,flagged,flag_reason
             FROM messages WHERE community_id=? ORDER BY timestamp ASC, id ASC",
        )
        .bind(community_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().map(StoredMessage::from).collect())
    }
}

impl CommunityCatalog for SqliteStore {
    async fn resolve(&self, room: &RoomId) -> Result<Option<RoomId>, StoreError> {
        let Some(community_id) = community_id(room) else {
            return Ok(None);
        };

        let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM communities WHERE id=?")
            .bind(community_id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(found.map(|(id,)| RoomId::from(id)))
    }
}
