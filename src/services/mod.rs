//! Service layer
//!
//! Business logic on top of the repositories. Each service owns its error
//! enum; the API layer maps those onto HTTP responses.

pub mod chat;
pub mod checkin;
pub mod notifier;
pub mod password;
pub mod user;

pub use chat::{ChatService, ChatServiceError, CreateChatInput};
pub use checkin::{CheckinService, CheckinServiceError, CreateCheckinInput};
pub use notifier::{ChatEvent, LogNotifier, Notifier};
pub use password::{hash_password, verify_password};
pub use user::{RegisterInput, UserService, UserServiceError};
