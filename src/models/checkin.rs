//! Check-in model
//!
//! A check-in records a user's presence at a venue for a bounded window.
//! At most one active check-in exists per user; creating a new one replaces
//! any prior one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A proximity session: one user at one venue until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkin {
    /// Unique identifier
    pub id: i64,
    /// Venue the user checked in at
    pub venue_id: i64,
    /// Owning user
    pub user_id: i64,
    /// Age in years recorded at creation
    pub user_age: i64,
    /// Whether the check-in is still live
    pub active: bool,
    /// Absolute expiration timestamp, computed at creation
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Checkin {
    /// Check if the expiration time has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Tri-state filter on the `active` flag.
///
/// `Active` is the listing default; `All` disables the filter entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveFilter {
    #[default]
    Active,
    Inactive,
    All,
}

impl fmt::Display for ActiveFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveFilter::Active => write!(f, "true"),
            ActiveFilter::Inactive => write!(f, "false"),
            ActiveFilter::All => write!(f, "all"),
        }
    }
}

impl FromStr for ActiveFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "true" => Ok(ActiveFilter::Active),
            "false" => Ok(ActiveFilter::Inactive),
            "all" => Ok(ActiveFilter::All),
            _ => Err(anyhow::anyhow!("Invalid active filter: {}", s)),
        }
    }
}

/// Sort order for listings, by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Desc,
    Asc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Desc => write!(f, "desc"),
            SortOrder::Asc => write!(f, "asc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "desc" => Ok(SortOrder::Desc),
            "asc" => Ok(SortOrder::Asc),
            _ => Err(anyhow::anyhow!("Invalid sort order: {}", s)),
        }
    }
}

/// Filter for check-in listings.
#[derive(Debug, Clone, Default)]
pub struct CheckinFilter {
    pub venue_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Inclusive lower bound on `user_age`
    pub min_age: Option<i64>,
    /// Inclusive upper bound on `user_age`
    pub max_age: Option<i64>,
    pub active: ActiveFilter,
    pub sort: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl CheckinFilter {
    /// Cache key for this filter: the serialized query, one segment per field.
    pub fn cache_key(&self) -> String {
        fn seg<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_else(|| "-".into())
        }
        format!(
            "checkins:v={}:u={}:min={}:max={}:active={}:sort={}:limit={}:offset={}",
            seg(&self.venue_id),
            seg(&self.user_id),
            seg(&self.min_age),
            seg(&self.max_age),
            self.active,
            self.sort,
            seg(&self.limit),
            seg(&self.offset),
        )
    }
}
