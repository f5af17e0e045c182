//! Deactivation job model
//!
//! Durable records for the expiry scheduler. A job forces a chat into the
//! `expired` state when it fires, independent of store-level sweeps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A scheduled chat deactivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivationJob {
    /// Unique identifier
    pub id: i64,
    /// Chat to deactivate
    pub chat_id: i64,
    /// Earliest time the job may fire
    pub run_at: DateTime<Utc>,
    /// Attempts made so far
    pub attempts: i64,
    /// Job status
    pub status: JobStatus,
    /// Error message from the last failed attempt
    pub last_error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Job queue status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to fire (or to be retried)
    #[default]
    Pending,
    /// Fired successfully
    Done,
    /// Retries exhausted, manual remediation assumed
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// Queue depth snapshot for operator visibility.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Jobs waiting to fire
    pub pending: i64,
    /// Jobs that exhausted their retries
    pub failed: i64,
}
