use axum::{debug_handler, extract::State, http::StatusCode, Json};

use crate::{appresult::ApiError, db::SqliteStore, AppResult};

use super::{Community, NewCommunity};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_community(
    State(store): State<SqliteStore>,
    Json(new): Json<NewCommunity>,
) -> AppResult<(StatusCode, Json<Community>)> {
    if new.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required").into());
    }
    if new.moderator.trim().is_empty() {
        return Err(ApiError::bad_request("moderator is required").into());
    }

    let community = store.create_community(&new).await?;
    Ok((StatusCode::CREATED, Json(community)))
}
