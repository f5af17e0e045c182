//! Venue repository
//!
//! Venues and their weekly schedules. The session logic only reads venues;
//! creation is an admin operation.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ScheduleEntry, Venue};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Venue repository trait
#[async_trait]
pub trait VenueRepository: Send + Sync {
    /// Create a venue together with its weekly schedule
    async fn create(&self, name: &str, schedule: &[ScheduleEntry]) -> Result<Venue>;

    /// Get venue by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Venue>>;

    /// Get a venue's schedule entries
    async fn schedule(&self, venue_id: i64) -> Result<Vec<ScheduleEntry>>;

    /// List all venues
    async fn list(&self) -> Result<Vec<Venue>>;
}

/// SQLx-based venue repository.
pub struct SqlxVenueRepository {
    pool: DynDatabasePool,
}

impl SqlxVenueRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn VenueRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl VenueRepository for SqlxVenueRepository {
    async fn create(&self, name: &str, schedule: &[ScheduleEntry]) -> Result<Venue> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_sqlite(self.pool.as_sqlite().unwrap(), name, schedule).await
            }
            DatabaseDriver::Mysql => {
                create_mysql(self.pool.as_mysql().unwrap(), name, schedule).await
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Venue>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await,
            DatabaseDriver::Mysql => get_by_id_mysql(self.pool.as_mysql().unwrap(), id).await,
        }
    }

    async fn schedule(&self, venue_id: i64) -> Result<Vec<ScheduleEntry>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                schedule_sqlite(self.pool.as_sqlite().unwrap(), venue_id).await
            }
            DatabaseDriver::Mysql => schedule_mysql(self.pool.as_mysql().unwrap(), venue_id).await,
        }
    }

    async fn list(&self) -> Result<Vec<Venue>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => list_sqlite(self.pool.as_sqlite().unwrap()).await,
            DatabaseDriver::Mysql => list_mysql(self.pool.as_mysql().unwrap()).await,
        }
    }
}

async fn create_sqlite(
    pool: &SqlitePool,
    name: &str,
    schedule: &[ScheduleEntry],
) -> Result<Venue> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let created_at = Utc::now();

    let result = sqlx::query("INSERT INTO venues (name, created_at) VALUES (?, ?)")
        .bind(name)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create venue")?;
    let venue_id = result.last_insert_rowid();

    for entry in schedule {
        sqlx::query(
            "INSERT INTO venue_schedules (venue_id, weekday, opens_at, closes_at) VALUES (?, ?, ?, ?)",
        )
        .bind(venue_id)
        .bind(entry.weekday)
        .bind(entry.opens_at)
        .bind(entry.closes_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create schedule entry")?;
    }

    tx.commit().await.context("Failed to commit venue")?;

    Ok(Venue {
        id: venue_id,
        name: name.to_string(),
        created_at,
    })
}

async fn create_mysql(pool: &MySqlPool, name: &str, schedule: &[ScheduleEntry]) -> Result<Venue> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;
    let created_at = Utc::now();

    let result = sqlx::query("INSERT INTO venues (name, created_at) VALUES (?, ?)")
        .bind(name)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create venue")?;
    let venue_id = result.last_insert_id() as i64;

    for entry in schedule {
        sqlx::query(
            "INSERT INTO venue_schedules (venue_id, weekday, opens_at, closes_at) VALUES (?, ?, ?, ?)",
        )
        .bind(venue_id)
        .bind(entry.weekday)
        .bind(entry.opens_at)
        .bind(entry.closes_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create schedule entry")?;
    }

    tx.commit().await.context("Failed to commit venue")?;

    Ok(Venue {
        id: venue_id,
        name: name.to_string(),
        created_at,
    })
}

async fn get_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Venue>> {
    let row = sqlx::query("SELECT id, name, created_at FROM venues WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get venue")?;

    Ok(row.map(|row| Venue {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }))
}

async fn get_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Venue>> {
    let row = sqlx::query("SELECT id, name, created_at FROM venues WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get venue")?;

    Ok(row.map(|row| Venue {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }))
}

async fn schedule_sqlite(pool: &SqlitePool, venue_id: i64) -> Result<Vec<ScheduleEntry>> {
    let rows = sqlx::query(
        "SELECT weekday, opens_at, closes_at FROM venue_schedules WHERE venue_id = ? ORDER BY weekday",
    )
    .bind(venue_id)
    .fetch_all(pool)
    .await
    .context("Failed to get venue schedule")?;

    Ok(rows
        .iter()
        .map(|row| ScheduleEntry {
            weekday: row.get("weekday"),
            opens_at: row.get("opens_at"),
            closes_at: row.get("closes_at"),
        })
        .collect())
}

async fn schedule_mysql(pool: &MySqlPool, venue_id: i64) -> Result<Vec<ScheduleEntry>> {
    let rows = sqlx::query(
        "SELECT weekday, opens_at, closes_at FROM venue_schedules WHERE venue_id = ? ORDER BY weekday",
    )
    .bind(venue_id)
    .fetch_all(pool)
    .await
    .context("Failed to get venue schedule")?;

    Ok(rows
        .iter()
        .map(|row| ScheduleEntry {
            weekday: row.get("weekday"),
            opens_at: row.get("opens_at"),
            closes_at: row.get("closes_at"),
        })
        .collect())
}

async fn list_sqlite(pool: &SqlitePool) -> Result<Vec<Venue>> {
    let rows = sqlx::query("SELECT id, name, created_at FROM venues ORDER BY name")
        .fetch_all(pool)
        .await
        .context("Failed to list venues")?;

    Ok(rows
        .iter()
        .map(|row| Venue {
            id: row.get("id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        })
        .collect())
}

async fn list_mysql(pool: &MySqlPool) -> Result<Vec<Venue>> {
    let rows = sqlx::query("SELECT id, name, created_at FROM venues ORDER BY name")
        .fetch_all(pool)
        .await
        .context("Failed to list venues")?;

    Ok(rows
        .iter()
        .map(|row| Venue {
            id: row.get("id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        })
        .collect())
}
