mod community;
mod membership;
mod messages;
mod new;
mod store;

use axum::{routing::{get, post}, Router};
use serde::{Deserialize, Serialize};

use crate::{appresult::ApiError, db::SqliteStore, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(community::list_communities).post(new::new_community))
        .route("/{id}", get(community::community))
        .route("/{id}/join", post(membership::join_community))
        .route("/{id}/leave", post(membership::leave_community))
        .route("/{id}/messages", get(messages::messages))
        .route("/{id}/summary", get(messages::summary))
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCommunity {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub moderator: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Community {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub moderator: String,
    /// Generated identifier of the community's chat channel.
    pub chat_room: String,
    pub members: Vec<String>,
}

pub(crate) const COMMUNITY_NOT_FOUND: &str = "Community not found";

pub(crate) async fn find_community(store: &SqliteStore, id: i64) -> anyhow::Result<Community> {
    store
        .get_community(id)
        .await?
        .ok_or_else(|| ApiError::not_found(COMMUNITY_NOT_FOUND).into())
}
