//! Message repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Message;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Message repository trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Insert a new message, returning it with the assigned id
    async fn create(&self, message: &Message) -> Result<Message>;

    /// Number of messages in a chat
    async fn count_for_chat(&self, chat_id: i64) -> Result<i64>;

    /// Messages of a chat in send order
    async fn list_for_chat(&self, chat_id: i64) -> Result<Vec<Message>>;
}

/// SQLx-based message repository.
pub struct SqlxMessageRepository {
    pool: DynDatabasePool,
}

impl SqlxMessageRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn MessageRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl MessageRepository for SqlxMessageRepository {
    async fn create(&self, message: &Message) -> Result<Message> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.as_sqlite().unwrap(), message).await,
            DatabaseDriver::Mysql => create_mysql(self.pool.as_mysql().unwrap(), message).await,
        }
    }

    async fn count_for_chat(&self, chat_id: i64) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                count_for_chat_sqlite(self.pool.as_sqlite().unwrap(), chat_id).await
            }
            DatabaseDriver::Mysql => {
                count_for_chat_mysql(self.pool.as_mysql().unwrap(), chat_id).await
            }
        }
    }

    async fn list_for_chat(&self, chat_id: i64) -> Result<Vec<Message>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_for_chat_sqlite(self.pool.as_sqlite().unwrap(), chat_id).await
            }
            DatabaseDriver::Mysql => {
                list_for_chat_mysql(self.pool.as_mysql().unwrap(), chat_id).await
            }
        }
    }
}

const INSERT_MESSAGE: &str =
    "INSERT INTO messages (chat_id, sender_id, body, created_at) VALUES (?, ?, ?, ?)";

const SELECT_MESSAGES: &str = r#"
    SELECT id, chat_id, sender_id, body, created_at FROM messages
    WHERE chat_id = ? ORDER BY created_at ASC, id ASC
"#;

async fn create_sqlite(pool: &SqlitePool, message: &Message) -> Result<Message> {
    let result = sqlx::query(INSERT_MESSAGE)
        .bind(message.chat_id)
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.created_at)
        .execute(pool)
        .await
        .context("Failed to create message")?;

    let mut created = message.clone();
    created.id = result.last_insert_rowid();
    Ok(created)
}

async fn create_mysql(pool: &MySqlPool, message: &Message) -> Result<Message> {
    let result = sqlx::query(INSERT_MESSAGE)
        .bind(message.chat_id)
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.created_at)
        .execute(pool)
        .await
        .context("Failed to create message")?;

    let mut created = message.clone();
    created.id = result.last_insert_id() as i64;
    Ok(created)
}

async fn count_for_chat_sqlite(pool: &SqlitePool, chat_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE chat_id = ?")
        .bind(chat_id)
        .fetch_one(pool)
        .await
        .context("Failed to count messages")?;
    Ok(row.get("n"))
}

async fn count_for_chat_mysql(pool: &MySqlPool, chat_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE chat_id = ?")
        .bind(chat_id)
        .fetch_one(pool)
        .await
        .context("Failed to count messages")?;
    Ok(row.get("n"))
}

async fn list_for_chat_sqlite(pool: &SqlitePool, chat_id: i64) -> Result<Vec<Message>> {
    let rows = sqlx::query(SELECT_MESSAGES)
        .bind(chat_id)
        .fetch_all(pool)
        .await
        .context("Failed to list messages")?;

    Ok(rows
        .iter()
        .map(|row| Message {
            id: row.get("id"),
            chat_id: row.get("chat_id"),
            sender_id: row.get("sender_id"),
            body: row.get("body"),
            created_at: row.get("created_at"),
        })
        .collect())
}

async fn list_for_chat_mysql(pool: &MySqlPool, chat_id: i64) -> Result<Vec<Message>> {
    let rows = sqlx::query(SELECT_MESSAGES)
        .bind(chat_id)
        .fetch_all(pool)
        .await
        .context("Failed to list messages")?;

    Ok(rows
        .iter()
        .map(|row| Message {
            id: row.get("id"),
            chat_id: row.get("chat_id"),
            sender_id: row.get("sender_id"),
            body: row.get("body"),
            created_at: row.get("created_at"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        ChatRepository, SqlxChatRepository, SqlxUserRepository, SqlxVenueRepository,
        UserRepository, VenueRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{Chat, ChatStatus, User, UserRole};
    use chrono::{Duration, Utc};

    struct Fixture {
        repo: SqlxMessageRepository,
        user_id: i64,
        chat_id: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let user = users
            .create(&User::new(
                "ada".to_string(),
                "ada@example.com".to_string(),
                "hash".to_string(),
                UserRole::Member,
                None,
            ))
            .await
            .unwrap();

        let venues = SqlxVenueRepository::new(pool.clone());
        let venue = venues.create("Harbor House", &[]).await.unwrap();

        let chats = SqlxChatRepository::new(pool.clone());
        let now = Utc::now();
        let chat = chats
            .replace_for_user(&Chat {
                id: 0,
                venue_id: venue.id,
                user_id: user.id,
                user_age: 30,
                status: ChatStatus::Accepted,
                active: true,
                expires_at: now + Duration::hours(2),
                created_at: now,
            })
            .await
            .unwrap();

        Fixture {
            repo: SqlxMessageRepository::new(pool),
            user_id: user.id,
            chat_id: chat.id,
        }
    }

    fn message_for(chat_id: i64, sender_id: i64, body: &str) -> Message {
        Message {
            id: 0,
            chat_id,
            sender_id,
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_count() {
        let f = setup().await;

        assert_eq!(f.repo.count_for_chat(f.chat_id).await.unwrap(), 0);

        f.repo
            .create(&message_for(f.chat_id, f.user_id, "hey"))
            .await
            .unwrap();
        f.repo
            .create(&message_for(f.chat_id, f.user_id, "still around?"))
            .await
            .unwrap();

        assert_eq!(f.repo.count_for_chat(f.chat_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_in_send_order() {
        let f = setup().await;
        for body in ["one", "two", "three"] {
            f.repo
                .create(&message_for(f.chat_id, f.user_id, body))
                .await
                .unwrap();
        }

        let messages = f.repo.list_for_chat(f.chat_id).await.unwrap();
        let bodies: Vec<&str> = messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }
}
