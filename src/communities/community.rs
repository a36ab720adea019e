use axum::{debug_handler, extract::{Path, State}, Json};

use crate::{db::SqliteStore, AppResult};

use super::{find_community, Community};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_communities(
    State(store): State<SqliteStore>,
) -> AppResult<Json<Vec<Community>>> {
    Ok(Json(store.list_communities().await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn community(
    State(store): State<SqliteStore>,
    Path(id): Path<i64>,
) -> AppResult<Json<Community>> {
    Ok(Json(find_community(&store, id).await?))
}
