use uuid::Uuid;

use super::{Community, NewCommunity};
use crate::db::SqliteStore;

#[derive(sqlx::FromRow)]
struct CommunityRow {
    id: i64,
    name: String,
    description: String,
    tags: String,
    moderator: String,
    chat_room: String,
}

impl CommunityRow {
    fn into_community(self, members: Vec<String>) -> Community {
        Community {
            id: self.id,
            name: self.name,
            description: self.description,
            tags: split_tags(&self.tags),
            moderator: self.moderator,
            chat_room: self.chat_room,
            members,
        }
    }
}

fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect()
}

fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|tag| tag.trim().replace(',', " "))
        .filter(|tag| !tag.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

impl SqliteStore {
    pub async fn create_community(&self, new: &NewCommunity) -> Result<Community, sqlx::Error> {
        let chat_room = Uuid::new_v4().to_string();
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO communities (name,description,tags,moderator,chat_room) VALUES (?,?,?,?,?) RETURNING id",
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(join_tags(&new.tags))
        .bind(&new.moderator)
        .bind(&chat_room)
        .fetch_one(&self.db_pool)
        .await?;

        tracing::info!(id, name = %new.name, "community created");

        Ok(Community {
            id,
            name: new.name.clone(),
            description: new.description.clone(),
            tags: split_tags(&join_tags(&new.tags)),
            moderator: new.moderator.clone(),
            chat_room,
            members: Vec::new(),
        })
    }

    pub async fn list_communities(&self) -> Result<Vec<Community>, sqlx::Error> {
        let rows: Vec<CommunityRow> = sqlx::query_as(
            "SELECT id,name,description,tags,moderator,chat_room FROM communities ORDER BY id",
        )
        .fetch_all(&self.db_pool)
        .await?;

        let mut communities = Vec::with_capacity(rows.len());
        for row in rows {
            let members = self.community_members(row.id).await?;
            communities.push(row.into_community(members));
        }
        Ok(communities)
    }

    pub async fn get_community(&self, id: i64) -> Result<Option<Community>, sqlx::Error> {
        let row: Option<CommunityRow> = sqlx::query_as(
            "SELECT id,name,description,tags,moderator,chat_room FROM communities WHERE id=?",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        match row {
            Some(row) => {
                let members = self.community_members(row.id).await?;
                Ok(Some(row.into_community(members)))
            }
            None => Ok(None),
        }
    }

    /// Member ids in the order they joined.
    pub async fn community_members(&self, id: i64) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM community_members WHERE community_id=? ORDER BY rowid",
        )
        .bind(id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }

    /// Idempotent. Returns whether the user was newly added.
    pub async fn add_member(&self, id: i64, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("INSERT OR IGNORE INTO community_members (community_id,user_id) VALUES (?,?)")
            .bind(id)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Idempotent. Returns whether the user was a member.
    pub async fn remove_member(&self, id: i64, user_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM community_members WHERE community_id=? AND user_id=?")
            .bind(id)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
