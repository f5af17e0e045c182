//! Chat model
//!
//! A chat is a bounded conversation scoped to a venue, derived from
//! co-located check-ins. Status moves monotonically toward a terminal
//! state; terminal states are never overwritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::checkin::{ActiveFilter, SortOrder};

/// A venue-scoped conversation owned by one non-admin participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Unique identifier
    pub id: i64,
    /// Venue the chat is scoped to
    pub venue_id: i64,
    /// Owning user
    pub user_id: i64,
    /// Age in years recorded at creation
    pub user_age: i64,
    /// Lifecycle status
    pub status: ChatStatus,
    /// Whether the chat is still live
    pub active: bool,
    /// Absolute expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Chat {
    /// Check if the expiration time has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Chat lifecycle status.
///
/// `created -> accepted -> (rejected | exhausted | expired)`; rejection is
/// also allowed straight from `created`, and expiry from any non-terminal
/// state. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    /// Waiting for the other participant to accept
    #[default]
    Created,
    /// Both parties agreed; messages may be exchanged
    Accepted,
    /// A participant declined (terminal)
    Rejected,
    /// The message cap was reached (terminal)
    Exhausted,
    /// The deactivation deadline passed (terminal)
    Expired,
}

impl ChatStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ChatStatus::Rejected | ChatStatus::Exhausted | ChatStatus::Expired)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: ChatStatus) -> bool {
        match (self, next) {
            (ChatStatus::Created, ChatStatus::Accepted) => true,
            (ChatStatus::Created | ChatStatus::Accepted, ChatStatus::Rejected) => true,
            (ChatStatus::Accepted, ChatStatus::Exhausted) => true,
            (from, ChatStatus::Expired) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatStatus::Created => "created",
            ChatStatus::Accepted => "accepted",
            ChatStatus::Rejected => "rejected",
            ChatStatus::Exhausted => "exhausted",
            ChatStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ChatStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(ChatStatus::Created),
            "accepted" => Ok(ChatStatus::Accepted),
            "rejected" => Ok(ChatStatus::Rejected),
            "exhausted" => Ok(ChatStatus::Exhausted),
            "expired" => Ok(ChatStatus::Expired),
            _ => Err(anyhow::anyhow!("Invalid chat status: {}", s)),
        }
    }
}

/// Filter for chat listings.
#[derive(Debug, Clone, Default)]
pub struct ChatFilter {
    pub venue_id: Option<i64>,
    pub user_id: Option<i64>,
    pub status: Option<ChatStatus>,
    pub active: ActiveFilter,
    pub sort: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ChatFilter {
    /// Cache key for this filter: the serialized query.
    pub fn cache_key(&self) -> String {
        fn seg<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_else(|| "-".into())
        }
        format!(
            "chats:v={}:u={}:status={}:active={}:sort={}:limit={}:offset={}",
            seg(&self.venue_id),
            seg(&self.user_id),
            seg(&self.status),
            self.active,
            self.sort,
            seg(&self.limit),
            seg(&self.offset),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ChatStatus::Created.is_terminal());
        assert!(!ChatStatus::Accepted.is_terminal());
        assert!(ChatStatus::Rejected.is_terminal());
        assert!(ChatStatus::Exhausted.is_terminal());
        assert!(ChatStatus::Expired.is_terminal());
    }

    #[test]
    fn test_forward_transitions() {
        assert!(ChatStatus::Created.can_transition_to(ChatStatus::Accepted));
        assert!(ChatStatus::Created.can_transition_to(ChatStatus::Rejected));
        assert!(ChatStatus::Accepted.can_transition_to(ChatStatus::Rejected));
        assert!(ChatStatus::Accepted.can_transition_to(ChatStatus::Exhausted));
        assert!(ChatStatus::Created.can_transition_to(ChatStatus::Expired));
        assert!(ChatStatus::Accepted.can_transition_to(ChatStatus::Expired));
    }

    #[test]
    fn test_no_backward_or_terminal_transitions() {
        assert!(!ChatStatus::Accepted.can_transition_to(ChatStatus::Created));
        assert!(!ChatStatus::Created.can_transition_to(ChatStatus::Exhausted));
        // Terminal states are final, even against forced expiry
        assert!(!ChatStatus::Rejected.can_transition_to(ChatStatus::Expired));
        assert!(!ChatStatus::Exhausted.can_transition_to(ChatStatus::Expired));
        assert!(!ChatStatus::Expired.can_transition_to(ChatStatus::Accepted));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ChatStatus::Created,
            ChatStatus::Accepted,
            ChatStatus::Rejected,
            ChatStatus::Exhausted,
            ChatStatus::Expired,
        ] {
            assert_eq!(ChatStatus::from_str(&status.to_string()).unwrap(), status);
        }
        assert!(ChatStatus::from_str("open").is_err());
    }
}
