//! Database migrations
//!
//! Code-based migrations embedded in the binary, tracked in a `_migrations`
//! table. Each migration carries its statements per driver so no SQL parsing
//! is needed at runtime.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with statements for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (unique, ordered)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// Statements for SQLite
    pub up_sqlite: &'static [&'static str],
    /// Statements for MySQL
    pub up_mysql: &'static [&'static str],
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All migrations, in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: &[
            r#"CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(50) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'member',
                birthdate DATE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
        ],
        up_mysql: &[
            r#"CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                username VARCHAR(50) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'member',
                birthdate DATE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
            )"#,
            "CREATE INDEX idx_users_username ON users(username)",
        ],
    },
    Migration {
        version: 2,
        name: "create_auth_sessions",
        up_sqlite: &[
            r#"CREATE TABLE IF NOT EXISTS auth_sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_auth_sessions_user_id ON auth_sessions(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_auth_sessions_expires_at ON auth_sessions(expires_at)",
        ],
        up_mysql: &[
            r#"CREATE TABLE IF NOT EXISTS auth_sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX idx_auth_sessions_user_id ON auth_sessions(user_id)",
            "CREATE INDEX idx_auth_sessions_expires_at ON auth_sessions(expires_at)",
        ],
    },
    Migration {
        version: 3,
        name: "create_venues",
        up_sqlite: &[
            r#"CREATE TABLE IF NOT EXISTS venues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(255) NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            r#"CREATE TABLE IF NOT EXISTS venue_schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                venue_id INTEGER NOT NULL,
                weekday INTEGER NOT NULL,
                opens_at INTEGER NOT NULL,
                closes_at INTEGER NOT NULL,
                FOREIGN KEY (venue_id) REFERENCES venues(id) ON DELETE CASCADE,
                UNIQUE (venue_id, weekday)
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_venue_schedules_venue_id ON venue_schedules(venue_id)",
        ],
        up_mysql: &[
            r#"CREATE TABLE IF NOT EXISTS venues (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(255) NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            r#"CREATE TABLE IF NOT EXISTS venue_schedules (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                venue_id BIGINT NOT NULL,
                weekday INT NOT NULL,
                opens_at INT NOT NULL,
                closes_at INT NOT NULL,
                FOREIGN KEY (venue_id) REFERENCES venues(id) ON DELETE CASCADE,
                UNIQUE (venue_id, weekday)
            )"#,
            "CREATE INDEX idx_venue_schedules_venue_id ON venue_schedules(venue_id)",
        ],
    },
    Migration {
        version: 4,
        name: "create_checkins",
        up_sqlite: &[
            r#"CREATE TABLE IF NOT EXISTS checkins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                venue_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                user_age INTEGER NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (venue_id) REFERENCES venues(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_checkins_user_id ON checkins(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_checkins_venue_id ON checkins(venue_id)",
            "CREATE INDEX IF NOT EXISTS idx_checkins_expires_at ON checkins(expires_at)",
        ],
        up_mysql: &[
            r#"CREATE TABLE IF NOT EXISTS checkins (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                venue_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                user_age BIGINT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (venue_id) REFERENCES venues(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX idx_checkins_user_id ON checkins(user_id)",
            "CREATE INDEX idx_checkins_venue_id ON checkins(venue_id)",
            "CREATE INDEX idx_checkins_expires_at ON checkins(expires_at)",
        ],
    },
    Migration {
        version: 5,
        name: "create_chats",
        up_sqlite: &[
            r#"CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                venue_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                user_age INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'created',
                active BOOLEAN NOT NULL DEFAULT 1,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (venue_id) REFERENCES venues(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_chats_user_id ON chats(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_chats_venue_id ON chats(venue_id)",
            "CREATE INDEX IF NOT EXISTS idx_chats_expires_at ON chats(expires_at)",
        ],
        up_mysql: &[
            r#"CREATE TABLE IF NOT EXISTS chats (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                venue_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                user_age BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'created',
                active BOOLEAN NOT NULL DEFAULT 1,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (venue_id) REFERENCES venues(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX idx_chats_user_id ON chats(user_id)",
            "CREATE INDEX idx_chats_venue_id ON chats(venue_id)",
            "CREATE INDEX idx_chats_expires_at ON chats(expires_at)",
        ],
    },
    Migration {
        version: 6,
        name: "create_messages",
        up_sqlite: &[
            r#"CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                sender_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
                FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id)",
        ],
        up_mysql: &[
            r#"CREATE TABLE IF NOT EXISTS messages (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                chat_id BIGINT NOT NULL,
                sender_id BIGINT NOT NULL,
                body TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
                FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX idx_messages_chat_id ON messages(chat_id)",
        ],
    },
    Migration {
        version: 7,
        name: "create_deactivation_jobs",
        up_sqlite: &[
            r#"CREATE TABLE IF NOT EXISTS deactivation_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                run_at TIMESTAMP NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                last_error TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_deactivation_jobs_status_run_at ON deactivation_jobs(status, run_at)",
        ],
        up_mysql: &[
            r#"CREATE TABLE IF NOT EXISTS deactivation_jobs (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                chat_id BIGINT NOT NULL,
                run_at TIMESTAMP NOT NULL,
                attempts BIGINT NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                last_error TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
            )"#,
            "CREATE INDEX idx_deactivation_jobs_status_run_at ON deactivation_jobs(status, run_at)",
        ],
    },
];

/// Run all pending migrations. Returns the number applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!("Applying migration {}: {}", migration.version, migration.name);
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#
        }
        DatabaseDriver::Mysql => {
            r#"CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

/// List already-applied migrations.
pub async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => {
            get_applied_migrations_sqlite(pool.as_sqlite().unwrap()).await
        }
        DatabaseDriver::Mysql => get_applied_migrations_mysql(pool.as_mysql().unwrap()).await,
    }
}

async fn get_applied_migrations_sqlite(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn get_applied_migrations_mysql(pool: &MySqlPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => {
            let sqlite = pool.as_sqlite().unwrap();
            for statement in migration.up_sqlite {
                sqlx::query(statement)
                    .execute(sqlite)
                    .await
                    .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
            }
            sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .execute(sqlite)
                .await?;
        }
        DatabaseDriver::Mysql => {
            let mysql = pool.as_mysql().unwrap();
            for statement in migration.up_mysql {
                sqlx::query(statement)
                    .execute(mysql)
                    .await
                    .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
            }
            sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .execute(mysql)
                .await?;
        }
    }

    Ok(())
}

fn truncate_sql(sql: &str) -> String {
    if sql.len() > 100 {
        format!("{}...", &sql[..100])
    } else {
        sql.to_string()
    }
}

/// Get the total number of migrations defined
pub fn total_migrations() -> usize {
    MIGRATIONS.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_checkin_requires_existing_user() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let sqlite = pool.as_sqlite().unwrap();

        sqlx::query("INSERT INTO venues (name) VALUES ('Cafe Luna')")
            .execute(sqlite)
            .await
            .expect("Failed to create venue");

        // Foreign key on user_id must reject an unknown user
        let result = sqlx::query(
            "INSERT INTO checkins (venue_id, user_id, user_age, expires_at) VALUES (1, 999, 30, datetime('now', '+1 hour'))",
        )
        .execute(sqlite)
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_venue_schedule_unique_per_weekday() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let sqlite = pool.as_sqlite().unwrap();

        sqlx::query("INSERT INTO venues (name) VALUES ('Cafe Luna')")
            .execute(sqlite)
            .await
            .expect("Failed to create venue");

        sqlx::query("INSERT INTO venue_schedules (venue_id, weekday, opens_at, closes_at) VALUES (1, 1, 540, 1320)")
            .execute(sqlite)
            .await
            .expect("Failed to create schedule entry");

        let duplicate = sqlx::query("INSERT INTO venue_schedules (venue_id, weekday, opens_at, closes_at) VALUES (1, 1, 600, 1200)")
            .execute(sqlite)
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_chat_status_default() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let sqlite = pool.as_sqlite().unwrap();

        sqlx::query("INSERT INTO users (username, email, password_hash) VALUES ('a', 'a@x.com', 'h')")
            .execute(sqlite)
            .await
            .unwrap();
        sqlx::query("INSERT INTO venues (name) VALUES ('Bar Nou')")
            .execute(sqlite)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO chats (venue_id, user_id, user_age, expires_at) VALUES (1, 1, 25, datetime('now', '+1 hour'))",
        )
        .execute(sqlite)
        .await
        .unwrap();

        let row = sqlx::query("SELECT status FROM chats WHERE id = 1")
            .fetch_one(sqlite)
            .await
            .unwrap();
        let status: String = row.get("status");
        assert_eq!(status, "created");
    }

    #[tokio::test]
    async fn test_total_migrations() {
        assert_eq!(total_migrations(), 7);
    }
}
