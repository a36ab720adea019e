use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    chat::{MessageStore, RoomId, StoredMessage},
    db::SqliteStore,
    llm::LlmClient,
    summary::{summary_response, ChatLine, Summary},
    AppResult,
};

use super::find_community;

#[derive(Debug, Serialize)]
pub(crate) struct MessageView {
    id: i64,
    community_id: i64,
    sender: String,
    content: String,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    flagged: bool,
    flag_reason: Option<String>,
}

impl MessageView {
    fn new(community_id: i64, message: StoredMessage) -> Self {
        MessageView {
            id: message.id,
            community_id,
            sender: message.sender,
            content: message.content,
            timestamp: message.timestamp,
            flagged: message.verdict.flagged,
            flag_reason: message.verdict.reason,
        }
    }
}

async fn history(store: &SqliteStore, id: i64) -> AppResult<Vec<StoredMessage>> {
    find_community(store, id).await?;
    Ok(store.history(&RoomId::from(id)).await?)
}

/// Persisted chat of a community, oldest first. Flagged messages are included.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn messages(
    State(store): State<SqliteStore>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<MessageView>>> {
    let history = history(&store, id).await?;
    Ok(Json(history.into_iter().map(|message| MessageView::new(id, message)).collect()))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn summary(
    State(store): State<SqliteStore>,
    State(llm): State<LlmClient>,
    Path(id): Path<i64>,
) -> AppResult<Json<Summary>> {
    let lines: Vec<ChatLine> = history(&store, id)
        .await?
        .into_iter()
        .map(|message| ChatLine { sender: message.sender, content: message.content })
        .collect();

    summary_response(&llm, &lines).await
}
