//! Chat repository
//!
//! Status updates are guarded: `update_status` only writes when the row is
//! still in one of the expected source states, so a terminal state can
//! never be overwritten by a racing writer.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ActiveFilter, Chat, ChatFilter, ChatStatus, SortOrder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Chat repository trait
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Atomically delete the user's existing chats and insert this one
    async fn replace_for_user(&self, chat: &Chat) -> Result<Chat>;

    /// Get chat by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Chat>>;

    /// Move a chat to `next`, but only if it is currently in one of
    /// `expected`. Returns false when the guard did not match.
    async fn update_status(
        &self,
        id: i64,
        expected: &[ChatStatus],
        next: ChatStatus,
    ) -> Result<bool>;

    /// List chats matching the filter
    async fn list(&self, filter: &ChatFilter) -> Result<Vec<Chat>>;

    /// Delete a chat; returns false when it did not exist
    async fn delete(&self, id: i64) -> Result<bool>;

    /// IDs of non-terminal chats whose expiration has passed
    async fn expired_ids(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<i64>>;
}

/// SQLx-based chat repository.
pub struct SqlxChatRepository {
    pool: DynDatabasePool,
}

impl SqlxChatRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ChatRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ChatRepository for SqlxChatRepository {
    async fn replace_for_user(&self, chat: &Chat) -> Result<Chat> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                replace_for_user_sqlite(self.pool.as_sqlite().unwrap(), chat).await
            }
            DatabaseDriver::Mysql => {
                replace_for_user_mysql(self.pool.as_mysql().unwrap(), chat).await
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Chat>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn update_status(
        &self,
        id: i64,
        expected: &[ChatStatus],
        next: ChatStatus,
    ) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                update_status_sqlite(self.pool.as_sqlite().unwrap(), id, expected, next).await
            }
            DatabaseDriver::Mysql => {
                update_status_mysql(self.pool.as_mysql().unwrap(), id, expected, next).await
            }
        }
    }

    async fn list(&self, filter: &ChatFilter) -> Result<Vec<Chat>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_sqlite(self.pool.as_sqlite().unwrap(), filter).await,
            DatabaseDriver::Mysql => list_mysql(self.pool.as_mysql().unwrap(), filter).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => delete_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn expired_ids(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<i64>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                expired_ids_sqlite(self.pool.as_sqlite().unwrap(), now, limit).await
            }
            DatabaseDriver::Mysql => {
                expired_ids_mysql(self.pool.as_mysql().unwrap(), now, limit).await
            }
        }
    }
}

const SELECT_CHAT: &str =
    "SELECT id, venue_id, user_id, user_age, status, active, expires_at, created_at FROM chats";

const INSERT_CHAT: &str = r#"
    INSERT INTO chats (venue_id, user_id, user_age, status, active, expires_at, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

fn build_list_sql(filter: &ChatFilter) -> String {
    let mut conditions: Vec<&str> = Vec::new();

    if filter.venue_id.is_some() {
        conditions.push("venue_id = ?");
    }
    if filter.user_id.is_some() {
        conditions.push("user_id = ?");
    }
    if filter.status.is_some() {
        conditions.push("status = ?");
    }
    match filter.active {
        ActiveFilter::Active => conditions.push("active = 1 AND expires_at > ?"),
        ActiveFilter::Inactive => conditions.push("(active = 0 OR expires_at <= ?)"),
        ActiveFilter::All => {}
    }

    let mut sql = SELECT_CHAT.to_string();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(match filter.sort {
        SortOrder::Desc => " ORDER BY created_at DESC",
        SortOrder::Asc => " ORDER BY created_at ASC",
    });

    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        if let Some(offset) = filter.offset {
            sql.push_str(&format!(" OFFSET {}", offset.max(0)));
        }
    }

    sql
}

fn status_guard_sql(expected: &[ChatStatus]) -> String {
    let placeholders = vec!["?"; expected.len()].join(", ");
    format!(
        "UPDATE chats SET status = ? WHERE id = ? AND status IN ({})",
        placeholders
    )
}

async fn replace_for_user_sqlite(pool: &SqlitePool, chat: &Chat) -> Result<Chat> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM chats WHERE user_id = ?")
        .bind(chat.user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove previous chats")?;

    let result = sqlx::query(INSERT_CHAT)
        .bind(chat.venue_id)
        .bind(chat.user_id)
        .bind(chat.user_age)
        .bind(chat.status.to_string())
        .bind(chat.active)
        .bind(chat.expires_at)
        .bind(chat.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create chat")?;

    tx.commit().await.context("Failed to commit chat")?;

    let mut created = chat.clone();
    created.id = result.last_insert_rowid();
    Ok(created)
}

async fn replace_for_user_mysql(pool: &MySqlPool, chat: &Chat) -> Result<Chat> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM chats WHERE user_id = ?")
        .bind(chat.user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove previous chats")?;

    let result = sqlx::query(INSERT_CHAT)
        .bind(chat.venue_id)
        .bind(chat.user_id)
        .bind(chat.user_age)
        .bind(chat.status.to_string())
        .bind(chat.active)
        .bind(chat.expires_at)
        .bind(chat.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create chat")?;

    tx.commit().await.context("Failed to commit chat")?;

    let mut created = chat.clone();
    created.id = result.last_insert_id() as i64;
    Ok(created)
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Chat>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CHAT))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chat")?;

    row.map(|r| row_to_chat_sqlite(&r)).transpose()
}

async fn get_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Chat>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CHAT))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chat")?;

    row.map(|r| row_to_chat_mysql(&r)).transpose()
}

async fn update_status_sqlite(
    pool: &SqlitePool,
    id: i64,
    expected: &[ChatStatus],
    next: ChatStatus,
) -> Result<bool> {
    let sql = status_guard_sql(expected);
    let mut query = sqlx::query(&sql).bind(next.to_string()).bind(id);
    for status in expected {
        query = query.bind(status.to_string());
    }

    let result = query
        .execute(pool)
        .await
        .context("Failed to update chat status")?;
    Ok(result.rows_affected() > 0)
}

async fn update_status_mysql(
    pool: &MySqlPool,
    id: i64,
    expected: &[ChatStatus],
    next: ChatStatus,
) -> Result<bool> {
    let sql = status_guard_sql(expected);
    let mut query = sqlx::query(&sql).bind(next.to_string()).bind(id);
    for status in expected {
        query = query.bind(status.to_string());
    }

    let result = query
        .execute(pool)
        .await
        .context("Failed to update chat status")?;
    Ok(result.rows_affected() > 0)
}

async fn list_sqlite(pool: &SqlitePool, filter: &ChatFilter) -> Result<Vec<Chat>> {
    let sql = build_list_sql(filter);
    let mut query = sqlx::query(&sql);

    if let Some(venue_id) = filter.venue_id {
        query = query.bind(venue_id);
    }
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    if let Some(status) = filter.status {
        query = query.bind(status.to_string());
    }
    if filter.active != ActiveFilter::All {
        query = query.bind(Utc::now());
    }

    let rows = query.fetch_all(pool).await.context("Failed to list chats")?;
    rows.iter().map(row_to_chat_sqlite).collect()
}

async fn list_mysql(pool: &MySqlPool, filter: &ChatFilter) -> Result<Vec<Chat>> {
    let sql = build_list_sql(filter);
    let mut query = sqlx::query(&sql);

    if let Some(venue_id) = filter.venue_id {
        query = query.bind(venue_id);
    }
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    if let Some(status) = filter.status {
        query = query.bind(status.to_string());
    }
    if filter.active != ActiveFilter::All {
        query = query.bind(Utc::now());
    }

    let rows = query.fetch_all(pool).await.context("Failed to list chats")?;
    rows.iter().map(row_to_chat_mysql).collect()
}

async fn delete_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM chats WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete chat")?;
    Ok(result.rows_affected() > 0)
}

async fn delete_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM chats WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete chat")?;
    Ok(result.rows_affected() > 0)
}

const EXPIRED_IDS: &str = r#"
    SELECT id FROM chats
    WHERE expires_at < ? AND status IN ('created', 'accepted')
    ORDER BY expires_at ASC
"#;

async fn expired_ids_sqlite(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<i64>> {
    let rows = sqlx::query(&format!("{} LIMIT {}", EXPIRED_IDS, limit.max(0)))
        .bind(now)
        .fetch_all(pool)
        .await
        .context("Failed to list expired chats")?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

async fn expired_ids_mysql(pool: &MySqlPool, now: DateTime<Utc>, limit: i64) -> Result<Vec<i64>> {
    let rows = sqlx::query(&format!("{} LIMIT {}", EXPIRED_IDS, limit.max(0)))
        .bind(now)
        .fetch_all(pool)
        .await
        .context("Failed to list expired chats")?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

fn row_to_chat_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Chat> {
    let status: String = row.get("status");
    Ok(Chat {
        id: row.get("id"),
        venue_id: row.get("venue_id"),
        user_id: row.get("user_id"),
        user_age: row.get("user_age"),
        status: ChatStatus::from_str(&status)?,
        active: row.get("active"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_chat_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Chat> {
    let status: String = row.get("status");
    Ok(Chat {
        id: row.get("id"),
        venue_id: row.get("venue_id"),
        user_id: row.get("user_id"),
        user_age: row.get("user_age"),
        status: ChatStatus::from_str(&status)?,
        active: row.get("active"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}
