//! Auth session repository
//!
//! Database operations for login sessions (bearer tokens). Proximity
//! check-ins live in their own repository.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::AuthSession;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Auth session repository trait
#[async_trait]
pub trait AuthSessionRepository: Send + Sync {
    /// Create a new session
    async fn create(&self, session: &AuthSession) -> Result<AuthSession>;

    /// Get session by ID (token)
    async fn get_by_id(&self, id: &str) -> Result<Option<AuthSession>>;

    /// Delete a session
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete expired sessions, returning how many were removed
    async fn delete_expired(&self) -> Result<i64>;
}

/// SQLx-based auth session repository.
pub struct SqlxAuthSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxAuthSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AuthSessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AuthSessionRepository for SqlxAuthSessionRepository {
    async fn create(&self, session: &AuthSession) -> Result<AuthSession> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_sqlite(self.pool.as_sqlite().unwrap(), session).await,
            DatabaseDriver::Mysql => create_mysql(self.pool.as_mysql().unwrap(), session).await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<AuthSession>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => delete_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn delete_expired(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_expired_sqlite(self.pool.as_sqlite().unwrap()).await,
            DatabaseDriver::Mysql => delete_expired_mysql(self.pool.as_mysql().unwrap()).await,
        }
    }
}

async fn create_sqlite(pool: &SqlitePool, session: &AuthSession) -> Result<AuthSession> {
    sqlx::query(
        "INSERT INTO auth_sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&session.id)
    .bind(session.user_id)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(pool)
    .await
    .context("Failed to create auth session")?;

    Ok(session.clone())
}

async fn create_mysql(pool: &MySqlPool, session: &AuthSession) -> Result<AuthSession> {
    sqlx::query(
        "INSERT INTO auth_sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&session.id)
    .bind(session.user_id)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(pool)
    .await
    .context("Failed to create auth session")?;

    Ok(session.clone())
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<AuthSession>> {
    let row = sqlx::query(
        "SELECT id, user_id, expires_at, created_at FROM auth_sessions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get auth session")?;

    Ok(row.map(|row| AuthSession {
        id: row.get("id"),
        user_id: row.get("user_id"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }))
}

async fn get_by_id_mysql(pool: &MySqlPool, id: &str) -> Result<Option<AuthSession>> {
    let row = sqlx::query(
        "SELECT id, user_id, expires_at, created_at FROM auth_sessions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get auth session")?;

    Ok(row.map(|row| AuthSession {
        id: row.get("id"),
        user_id: row.get("user_id"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }))
}

async fn delete_sqlite(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM auth_sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete auth session")?;
    Ok(())
}

async fn delete_mysql(pool: &MySqlPool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM auth_sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete auth session")?;
    Ok(())
}

async fn delete_expired_sqlite(pool: &SqlitePool) -> Result<i64> {
    let result = sqlx::query("DELETE FROM auth_sessions WHERE expires_at < ?")
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to delete expired auth sessions")?;
    Ok(result.rows_affected() as i64)
}

async fn delete_expired_mysql(pool: &MySqlPool) -> Result<i64> {
    let result = sqlx::query("DELETE FROM auth_sessions WHERE expires_at < ?")
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to delete expired auth sessions")?;
    Ok(result.rows_affected() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use crate::models::{User, UserRole};
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use chrono::Duration;
    use uuid::Uuid;

    async fn setup() -> (SqlxAuthSessionRepository, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let user = users
            .create(&User::new(
                "kay".to_string(),
                "kay@example.com".to_string(),
                "hash".to_string(),
                UserRole::Member,
                None,
            ))
            .await
            .expect("Failed to create user");

        (SqlxAuthSessionRepository::new(pool), user.id)
    }

    fn session_for(user_id: i64, hours: i64) -> AuthSession {
        let now = Utc::now();
        AuthSession {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + Duration::hours(hours),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (repo, user_id) = setup().await;

        let session = session_for(user_id, 24);
        repo.create(&session).await.expect("create failed");

        let found = repo
            .get_by_id(&session.id)
            .await
            .expect("get failed")
            .expect("session not found");
        assert_eq!(found.user_id, user_id);
        assert!(!found.is_expired());
    }

    #[tokio::test]
    async fn test_delete() {
        let (repo, user_id) = setup().await;

        let session = session_for(user_id, 24);
        repo.create(&session).await.expect("create failed");
        repo.delete(&session.id).await.expect("delete failed");

        assert!(repo.get_by_id(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired_only_removes_stale() {
        let (repo, user_id) = setup().await;

        let stale = session_for(user_id, -1);
        let live = session_for(user_id, 1);
        repo.create(&stale).await.unwrap();
        repo.create(&live).await.unwrap();

        let removed = repo.delete_expired().await.expect("sweep failed");
        assert_eq!(removed, 1);
        assert!(repo.get_by_id(&stale.id).await.unwrap().is_none());
        assert!(repo.get_by_id(&live.id).await.unwrap().is_some());
    }
}
