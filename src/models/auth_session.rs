//! Auth session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login session backing bearer/cookie token authentication.
///
/// Not to be confused with a proximity check-in: this record only proves the
/// caller's identity to the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    /// Session ID (token)
    pub id: String,
    /// Associated user ID
    pub user_id: i64,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl AuthSession {
    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
