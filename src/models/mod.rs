//! Domain models
//!
//! Plain data types shared by the repository, service and API layers.
//! Enums that are persisted as strings implement `Display`/`FromStr`.

pub mod auth_session;
pub mod checkin;
pub mod chat;
pub mod job;
pub mod message;
pub mod user;
pub mod venue;

pub use auth_session::AuthSession;
pub use checkin::{ActiveFilter, Checkin, CheckinFilter, SortOrder};
pub use chat::{Chat, ChatFilter, ChatStatus};
pub use job::{DeactivationJob, JobStatus, QueueDepth};
pub use message::Message;
pub use user::{User, UserRole};
pub use venue::{max_time_per_check, ScheduleEntry, Venue};
