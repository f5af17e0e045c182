//! Check-in repository
//!
//! Persistence for proximity sessions. `replace_for_user` removes the
//! user's previous check-in and inserts the new one inside a single
//! transaction, so the one-active-session invariant cannot be observed
//! broken between the two steps.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ActiveFilter, Checkin, CheckinFilter, SortOrder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Check-in repository trait
#[async_trait]
pub trait CheckinRepository: Send + Sync {
    /// Atomically delete the user's existing check-ins and insert this one
    async fn replace_for_user(&self, checkin: &Checkin) -> Result<Checkin>;

    /// Get check-in by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Checkin>>;

    /// List check-ins matching the filter
    async fn list(&self, filter: &CheckinFilter) -> Result<Vec<Checkin>>;

    /// Delete a check-in; returns false when it did not exist
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Remove check-ins whose expiration has passed
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<i64>;

    /// Number of live check-ins owned by the user
    async fn count_active_for_user(&self, user_id: i64) -> Result<i64>;
}

/// SQLx-based check-in repository.
pub struct SqlxCheckinRepository {
    pool: DynDatabasePool,
}

impl SqlxCheckinRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CheckinRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CheckinRepository for SqlxCheckinRepository {
    async fn replace_for_user(&self, checkin: &Checkin) -> Result<Checkin> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                replace_for_user_sqlite(self.pool.as_sqlite().unwrap(), checkin).await
            }
            DatabaseDriver::Mysql => {
                replace_for_user_mysql(self.pool.as_mysql().unwrap(), checkin).await
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Checkin>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn list(&self, filter: &CheckinFilter) -> Result<Vec<Checkin>> {
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

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_expired_sqlite(self.pool.as_sqlite().unwrap(), now).await
            }
            DatabaseDriver::Mysql => {
                delete_expired_mysql(self.pool.as_mysql().unwrap(), now).await
            }
        }
    }

    async fn count_active_for_user(&self, user_id: i64) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                count_active_sqlite(self.pool.as_sqlite().unwrap(), user_id).await
            }
            DatabaseDriver::Mysql => {
                count_active_mysql(self.pool.as_mysql().unwrap(), user_id).await
            }
        }
    }
}

const SELECT_CHECKIN: &str =
    "SELECT id, venue_id, user_id, user_age, active, expires_at, created_at FROM checkins";

const INSERT_CHECKIN: &str = r#"
    INSERT INTO checkins (venue_id, user_id, user_age, active, expires_at, created_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

/// WHERE clause and bind plan for a filter. Limit/offset are inlined since
/// they are integers under our control.
fn build_list_sql(filter: &CheckinFilter) -> String {
    let mut conditions: Vec<&str> = Vec::new();

    if filter.venue_id.is_some() {
        conditions.push("venue_id = ?");
    }
    if filter.user_id.is_some() {
        conditions.push("user_id = ?");
    }
    if filter.min_age.is_some() {
        conditions.push("user_age >= ?");
    }
    if filter.max_age.is_some() {
        conditions.push("user_age <= ?");
    }
    match filter.active {
        ActiveFilter::Active => conditions.push("active = 1 AND expires_at > ?"),
        ActiveFilter::Inactive => conditions.push("(active = 0 OR expires_at <= ?)"),
        ActiveFilter::All => {}
    }

    let mut sql = SELECT_CHECKIN.to_string();
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

async fn replace_for_user_sqlite(pool: &SqlitePool, checkin: &Checkin) -> Result<Checkin> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM checkins WHERE user_id = ?")
        .bind(checkin.user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove previous check-ins")?;

    let result = sqlx::query(INSERT_CHECKIN)
        .bind(checkin.venue_id)
        .bind(checkin.user_id)
        .bind(checkin.user_age)
        .bind(checkin.active)
        .bind(checkin.expires_at)
        .bind(checkin.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create check-in")?;

    tx.commit().await.context("Failed to commit check-in")?;

    let mut created = checkin.clone();
    created.id = result.last_insert_rowid();
    Ok(created)
}

async fn replace_for_user_mysql(pool: &MySqlPool, checkin: &Checkin) -> Result<Checkin> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    sqlx::query("DELETE FROM checkins WHERE user_id = ?")
        .bind(checkin.user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to remove previous check-ins")?;

    let result = sqlx::query(INSERT_CHECKIN)
        .bind(checkin.venue_id)
        .bind(checkin.user_id)
        .bind(checkin.user_age)
        .bind(checkin.active)
        .bind(checkin.expires_at)
        .bind(checkin.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create check-in")?;

    tx.commit().await.context("Failed to commit check-in")?;

    let mut created = checkin.clone();
    created.id = result.last_insert_id() as i64;
    Ok(created)
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Checkin>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CHECKIN))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get check-in")?;

    Ok(row.map(|r| row_to_checkin_sqlite(&r)))
}

async fn get_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Checkin>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CHECKIN))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get check-in")?;

    Ok(row.map(|r| row_to_checkin_mysql(&r)))
}

async fn list_sqlite(pool: &SqlitePool, filter: &CheckinFilter) -> Result<Vec<Checkin>> {
    let sql = build_list_sql(filter);
    let mut query = sqlx::query(&sql);

    if let Some(venue_id) = filter.venue_id {
        query = query.bind(venue_id);
    }
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    if let Some(min_age) = filter.min_age {
        query = query.bind(min_age);
    }
    if let Some(max_age) = filter.max_age {
        query = query.bind(max_age);
    }
    if filter.active != ActiveFilter::All {
        query = query.bind(Utc::now());
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list check-ins")?;

    Ok(rows.iter().map(row_to_checkin_sqlite).collect())
}

async fn list_mysql(pool: &MySqlPool, filter: &CheckinFilter) -> Result<Vec<Checkin>> {
    let sql = build_list_sql(filter);
    let mut query = sqlx::query(&sql);

    if let Some(venue_id) = filter.venue_id {
        query = query.bind(venue_id);
    }
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    if let Some(min_age) = filter.min_age {
        query = query.bind(min_age);
    }
    if let Some(max_age) = filter.max_age {
        query = query.bind(max_age);
    }
    if filter.active != ActiveFilter::All {
        query = query.bind(Utc::now());
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list check-ins")?;

    Ok(rows.iter().map(row_to_checkin_mysql).collect())
}

async fn delete_sqlite(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM checkins WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete check-in")?;
    Ok(result.rows_affected() > 0)
}

async fn delete_mysql(pool: &MySqlPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM checkins WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete check-in")?;
    Ok(result.rows_affected() > 0)
}

async fn delete_expired_sqlite(pool: &SqlitePool, now: DateTime<Utc>) -> Result<i64> {
    let result = sqlx::query("DELETE FROM checkins WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired check-ins")?;
    Ok(result.rows_affected() as i64)
}

async fn delete_expired_mysql(pool: &MySqlPool, now: DateTime<Utc>) -> Result<i64> {
    let result = sqlx::query("DELETE FROM checkins WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to delete expired check-ins")?;
    Ok(result.rows_affected() as i64)
}

async fn count_active_sqlite(pool: &SqlitePool, user_id: i64) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM checkins WHERE user_id = ? AND active = 1 AND expires_at > ?",
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("Failed to count active check-ins")?;
    Ok(row.get("n"))
}

async fn count_active_mysql(pool: &MySqlPool, user_id: i64) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM checkins WHERE user_id = ? AND active = 1 AND expires_at > ?",
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("Failed to count active check-ins")?;
    Ok(row.get("n"))
}

fn row_to_checkin_sqlite(row: &sqlx::sqlite::SqliteRow) -> Checkin {
    Checkin {
        id: row.get("id"),
        venue_id: row.get("venue_id"),
        user_id: row.get("user_id"),
        user_age: row.get("user_age"),
        active: row.get("active"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn row_to_checkin_mysql(row: &sqlx::mysql::MySqlRow) -> Checkin {
    Checkin {
        id: row.get("id"),
        venue_id: row.get("venue_id"),
        user_id: row.get("user_id"),
        user_age: row.get("user_age"),
        active: row.get("active"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}
