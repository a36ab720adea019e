use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{appresult::ApiError, db::SqliteStore, AppResult};

use super::find_community;

#[derive(Debug, Deserialize)]
pub(crate) struct MembershipQuery {
    #[serde(rename = "userId", alias = "user_id")]
    user_id: String,
}

/// Adds a user to the community's member list. Live chat presence is separate
/// and goes through the socket.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn join_community(
    State(store): State<SqliteStore>,
    Path(id): Path<i64>,
    Json(MembershipQuery { user_id }): Json<MembershipQuery>,
) -> AppResult<Json<Value>> {
    find_community(&store, id).await?;
    if user_id.trim().is_empty() {
        return Err(ApiError::bad_request("userId is required").into());
    }

    if store.add_member(id, &user_id).await? {
        tracing::debug!(community = id, %user_id, "member added");
    }
    Ok(Json(json!({ "message": "User joined community" })))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn leave_community(
    State(store): State<SqliteStore>,
    Path(id): Path<i64>,
    Json(MembershipQuery { user_id }): Json<MembershipQuery>,
) -> AppResult<Json<Value>> {
    let community = find_community(&store, id).await?;
    if community.moderator == user_id {
        return Err(ApiError::bad_request("Moderator cannot leave the community").into());
    }

    if store.remove_member(id, &user_id).await? {
        tracing::debug!(community = id, %user_id, "member removed");
    }
    Ok(Json(json!({ "message": "User left community" })))
}
