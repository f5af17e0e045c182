//! Message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message inside a chat.
///
/// The number of messages per chat is capped; the cap is enforced by the
/// chat service, which counts rows in this table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier
    pub id: i64,
    /// Owning chat
    pub chat_id: i64,
    /// Sending user
    pub sender_id: i64,
    /// Message text
    pub body: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}
