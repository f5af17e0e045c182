//! Chat event notification
//!
//! Chat lifecycle events are emitted through the `Notifier` trait. The
//! default implementation logs them; delivery to external channels is a
//! deployment concern behind the same seam.

use tracing::info;

/// Events emitted by the chat service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A chat was created and awaits acceptance
    ChatCreated {
        chat_id: i64,
        venue_id: i64,
        user_id: i64,
    },
    /// A participant declined the chat
    ChatRejected { chat_id: i64 },
    /// A message was stored in an accepted chat
    MessageReceived { chat_id: i64, message_id: i64 },
}

/// Notification seam for chat events.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: ChatEvent);
}

/// Notifier that writes events to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: ChatEvent) {
        match event {
            ChatEvent::ChatCreated {
                chat_id,
                venue_id,
                user_id,
            } => {
                info!(chat_id, venue_id, user_id, "chat created");
            }
            ChatEvent::ChatRejected { chat_id } => {
                info!(chat_id, "chat rejected");
            }
            ChatEvent::MessageReceived {
                chat_id,
                message_id,
            } => {
                info!(chat_id, message_id, "message received");
            }
        }
    }
}
