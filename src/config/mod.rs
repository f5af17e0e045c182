//! Configuration management
//!
//! Configuration is loaded from a `config.yml` file, with environment
//! variables (`MEETPOINT_*`) overriding file settings. Missing values are
//! filled with defaults so the server starts with no config file at all.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Check-in configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Chat configuration
    #[serde(default)]
    pub chat: ChatConfig,
    /// Expiry scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/meetpoint.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache driver (memory or redis)
    #[serde(default)]
    pub driver: CacheDriver,
    /// Redis connection URL (optional)
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Cache TTL in seconds; list-cache staleness is bounded by this
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            driver: CacheDriver::default(),
            redis_url: None,
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}

/// Cache driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
    /// In-memory cache (default)
    #[default]
    Memory,
    /// Redis cache
    Redis,
}

/// Check-in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Ceiling on check-in duration in seconds (default 18 hours)
    #[serde(default = "default_max_session_secs")]
    pub max_duration_seconds: u64,
    /// Age recorded when a user has no birthdate
    #[serde(default = "default_user_age")]
    pub default_user_age: i64,
    /// Auth token lifetime in seconds (default 7 days)
    #[serde(default = "default_auth_token_secs")]
    pub auth_token_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: default_max_session_secs(),
            default_user_age: default_user_age(),
            auth_token_seconds: default_auth_token_secs(),
        }
    }
}

fn default_max_session_secs() -> u64 {
    18 * 3600
}

fn default_user_age() -> i64 {
    18
}

fn default_auth_token_secs() -> u64 {
    7 * 24 * 3600
}

/// Chat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Chat lifetime in seconds before forced expiry (default 18 hours,
    /// turn it down to seconds for testing)
    #[serde(default = "default_chat_lifetime_secs")]
    pub lifetime_seconds: u64,
    /// Maximum messages per chat
    #[serde(default = "default_message_cap")]
    pub message_cap: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            lifetime_seconds: default_chat_lifetime_secs(),
            message_cap: default_message_cap(),
        }
    }
}

fn default_chat_lifetime_secs() -> u64 {
    18 * 3600
}

fn default_message_cap() -> i64 {
    3
}

/// Expiry scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll interval for due jobs, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_seconds: u64,
    /// Attempts before a job is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Base retry delay in seconds; doubled per attempt
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_seconds: u64,
    /// Warn when pending jobs exceed this depth
    #[serde(default = "default_warn_pending")]
    pub warn_pending_depth: i64,
    /// Warn when failed jobs exceed this depth
    #[serde(default = "default_warn_failed")]
    pub warn_failed_depth: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_seconds: default_backoff_base_secs(),
            warn_pending_depth: default_warn_pending(),
            warn_failed_depth: default_warn_failed(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_attempts() -> i64 {
    3
}

fn default_backoff_base_secs() -> u64 {
    60
}

fn default_warn_pending() -> i64 {
    100
}

fn default_warn_failed() -> i64 {
    1000
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
}

impl Config {
    /// Load configuration from file.
    ///
    /// A missing or empty file yields defaults; invalid YAML is an error
    /// with the offending location in the message.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: format_yaml_error(&e),
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides.
    ///
    /// Variables follow the pattern `MEETPOINT_<SECTION>_<FIELD>`, e.g.
    /// `MEETPOINT_SERVER_PORT`, `MEETPOINT_DATABASE_URL`,
    /// `MEETPOINT_CHAT_LIFETIME_SECONDS`.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MEETPOINT_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("MEETPOINT_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("MEETPOINT_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(driver) = std::env::var("MEETPOINT_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("MEETPOINT_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(driver) = std::env::var("MEETPOINT_CACHE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "memory" => self.cache.driver = CacheDriver::Memory,
                "redis" => self.cache.driver = CacheDriver::Redis,
                _ => {}
            }
        }
        if let Ok(redis_url) = std::env::var("MEETPOINT_CACHE_REDIS_URL") {
            self.cache.redis_url = Some(redis_url);
        }
        if let Ok(ttl) = std::env::var("MEETPOINT_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.cache.ttl_seconds = ttl;
            }
        }

        if let Ok(secs) = std::env::var("MEETPOINT_SESSION_MAX_DURATION_SECONDS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.session.max_duration_seconds = secs;
            }
        }
        if let Ok(age) = std::env::var("MEETPOINT_SESSION_DEFAULT_USER_AGE") {
            if let Ok(age) = age.parse::<i64>() {
                self.session.default_user_age = age;
            }
        }

        if let Ok(secs) = std::env::var("MEETPOINT_CHAT_LIFETIME_SECONDS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.chat.lifetime_seconds = secs;
            }
        }
        if let Ok(cap) = std::env::var("MEETPOINT_CHAT_MESSAGE_CAP") {
            if let Ok(cap) = cap.parse::<i64>() {
                self.chat.message_cap = cap;
            }
        }

        if let Ok(secs) = std::env::var("MEETPOINT_SCHEDULER_POLL_INTERVAL_SECONDS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.scheduler.poll_interval_seconds = secs;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!("at line {}, column {}: {}", location.line(), location.column(), e)
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
