//! Repository layer
//!
//! One trait per aggregate, with a SQLx implementation branching on the
//! configured driver. All methods return `anyhow::Result` with context;
//! business rules live in the service layer, not here.

pub mod auth_session;
pub mod checkin;
pub mod chat;
pub mod job;
pub mod message;
pub mod user;
pub mod venue;

pub use auth_session::{AuthSessionRepository, SqlxAuthSessionRepository};
pub use checkin::{CheckinRepository, SqlxCheckinRepository};
pub use chat::{ChatRepository, SqlxChatRepository};
pub use job::{JobRepository, SqlxJobRepository};
pub use message::{MessageRepository, SqlxMessageRepository};
pub use user::{SqlxUserRepository, UserRepository};
pub use venue::{SqlxVenueRepository, VenueRepository};
