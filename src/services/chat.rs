//! Chat service
//!
//! Lifecycle control for venue chats: creation with atomic replacement and
//! scheduled deactivation, guarded status transitions, and the bounded
//! message exchange. Guard order on send: unknown chat, then authorization,
//! then acceptance state, then the message cap.

use crate::cache::{Cache, CacheLayer};
use crate::config::{ChatConfig, SessionConfig};
use crate::db::repositories::{
    ChatRepository, CheckinRepository, JobRepository, MessageRepository, UserRepository,
    VenueRepository,
};
use crate::models::{
    ActiveFilter, Chat, ChatFilter, ChatStatus, CheckinFilter, DeactivationJob, JobStatus,
    Message, User,
};
use crate::services::notifier::{ChatEvent, Notifier};
use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::warn;

/// Error types for chat operations
#[derive(Debug, thiserror::Error)]
pub enum ChatServiceError {
    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller may not perform this operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Messages cannot be sent before the chat is accepted
    #[error("Chat has not been accepted yet")]
    ChatNotYetAccepted,

    /// The message cap has been reached
    #[error("Chat message limit reached")]
    ChatExhausted,

    /// Invalid input or state
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Chat creation input.
#[derive(Debug, Clone)]
pub struct CreateChatInput {
    pub venue_id: i64,
    /// Defaults to the caller; only admins may set someone else
    pub user_id: Option<i64>,
}

/// Chat service.
pub struct ChatService {
    users: Arc<dyn UserRepository>,
    venues: Arc<dyn VenueRepository>,
    checkins: Arc<dyn CheckinRepository>,
    chats: Arc<dyn ChatRepository>,
    messages: Arc<dyn MessageRepository>,
    jobs: Arc<dyn JobRepository>,
    cache: Arc<Cache>,
    notifier: Arc<dyn Notifier>,
    lifetime: Duration,
    message_cap: i64,
    default_user_age: i64,
    cache_ttl: std::time::Duration,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        venues: Arc<dyn VenueRepository>,
        checkins: Arc<dyn CheckinRepository>,
        chats: Arc<dyn ChatRepository>,
        messages: Arc<dyn MessageRepository>,
        jobs: Arc<dyn JobRepository>,
        cache: Arc<Cache>,
        notifier: Arc<dyn Notifier>,
        chat_config: &ChatConfig,
        session_config: &SessionConfig,
        cache_ttl: std::time::Duration,
    ) -> Self {
        Self {
            users,
            venues,
            checkins,
            chats,
            messages,
            jobs,
            cache,
            notifier,
            lifetime: Duration::seconds(chat_config.lifetime_seconds as i64),
            message_cap: chat_config.message_cap,
            default_user_age: session_config.default_user_age,
            cache_ttl,
        }
    }

    /// Open a chat at a venue, replacing any prior chat owned by the user.
    ///
    /// A deactivation job is enqueued for the chat's expiry time so the
    /// terminal `expired` state is forced even if nobody reads the chat
    /// again.
    pub async fn create(
        &self,
        caller: &User,
        input: CreateChatInput,
    ) -> Result<Chat, ChatServiceError> {
        let target_id = input.user_id.unwrap_or(caller.id);
        if !caller.can_act_on(target_id) {
            return Err(ChatServiceError::Forbidden(
                "Cannot open a chat on behalf of another user".to_string(),
            ));
        }

        let user = self
            .users
            .get_by_id(target_id)
            .await
            .context("Failed to look up user")?
            .ok_or_else(|| ChatServiceError::NotFound(format!("User {}", target_id)))?;

        let venue = self
            .venues
            .get_by_id(input.venue_id)
            .await
            .context("Failed to look up venue")?
            .ok_or_else(|| ChatServiceError::NotFound(format!("Venue {}", input.venue_id)))?;

        let now = Utc::now();
        let age = user.age_years(now).unwrap_or(self.default_user_age);
        let chat = Chat {
            id: 0,
            venue_id: venue.id,
            user_id: user.id,
            user_age: age,
            status: ChatStatus::Created,
            active: true,
            expires_at: now + self.lifetime,
            created_at: now,
        };

        let created = self
            .chats
            .replace_for_user(&chat)
            .await
            .context("Failed to store chat")?;

        self.jobs
            .enqueue(&DeactivationJob {
                id: 0,
                chat_id: created.id,
                run_at: created.expires_at,
                attempts: 0,
                status: JobStatus::Pending,
                last_error: None,
                created_at: now,
            })
            .await
            .context("Failed to schedule chat deactivation")?;

        self.notifier.notify(ChatEvent::ChatCreated {
            chat_id: created.id,
            venue_id: created.venue_id,
            user_id: created.user_id,
        });

        self.invalidate_listings().await;
        Ok(created)
    }

    /// Accept a pending chat. Peer (co-located user) or admin only.
    pub async fn accept(&self, caller: &User, id: i64) -> Result<Chat, ChatServiceError> {
        let chat = self.get(id).await?;
        self.ensure_participant(caller, &chat).await?;

        let updated = self
            .chats
            .update_status(id, &[ChatStatus::Created], ChatStatus::Accepted)
            .await
            .context("Failed to accept chat")?;
        if !updated {
            return Err(ChatServiceError::ValidationError(
                "Chat is not awaiting acceptance".to_string(),
            ));
        }

        self.invalidate_listings().await;
        self.get(id).await
    }

    /// Reject a chat. Allowed from `created` or `accepted` only.
    pub async fn reject(&self, caller: &User, id: i64) -> Result<Chat, ChatServiceError> {
        let chat = self.get(id).await?;
        self.ensure_participant(caller, &chat).await?;

        let updated = self
            .chats
            .update_status(
                id,
                &[ChatStatus::Created, ChatStatus::Accepted],
                ChatStatus::Rejected,
            )
            .await
            .context("Failed to reject chat")?;
        if !updated {
            return Err(ChatServiceError::ValidationError(
                "Chat is already closed".to_string(),
            ));
        }

        self.notifier.notify(ChatEvent::ChatRejected { chat_id: id });
        self.invalidate_listings().await;
        self.get(id).await
    }

    /// Send a message into an accepted chat.
    ///
    /// Exactly `message_cap` messages succeed; the first over-cap attempt
    /// flips the chat to `exhausted` and is rejected.
    pub async fn send_message(
        &self,
        caller: &User,
        id: i64,
        body: &str,
    ) -> Result<Message, ChatServiceError> {
        if body.trim().is_empty() {
            return Err(ChatServiceError::ValidationError(
                "Message body cannot be empty".to_string(),
            ));
        }

        let chat = self.get(id).await?;
        self.ensure_participant(caller, &chat).await?;

        match chat.status {
            ChatStatus::Created => return Err(ChatServiceError::ChatNotYetAccepted),
            ChatStatus::Exhausted => return Err(ChatServiceError::ChatExhausted),
            ChatStatus::Rejected | ChatStatus::Expired => {
                return Err(ChatServiceError::ValidationError(
                    "Chat is closed".to_string(),
                ))
            }
            ChatStatus::Accepted => {}
        }

        let count = self
            .messages
            .count_for_chat(id)
            .await
            .context("Failed to count messages")?;
        if count >= self.message_cap {
            self.chats
                .update_status(id, &[ChatStatus::Accepted], ChatStatus::Exhausted)
                .await
                .context("Failed to mark chat exhausted")?;
            self.invalidate_listings().await;
            return Err(ChatServiceError::ChatExhausted);
        }

        let message = self
            .messages
            .create(&Message {
                id: 0,
                chat_id: id,
                sender_id: caller.id,
                body: body.to_string(),
                created_at: Utc::now(),
            })
            .await
            .context("Failed to store message")?;

        self.notifier.notify(ChatEvent::MessageReceived {
            chat_id: id,
            message_id: message.id,
        });

        Ok(message)
    }

    /// Messages of a chat in send order. Participant or admin only.
    pub async fn messages(
        &self,
        caller: &User,
        id: i64,
    ) -> Result<Vec<Message>, ChatServiceError> {
        let chat = self.get(id).await?;
        self.ensure_participant(caller, &chat).await?;

        let messages = self
            .messages
            .list_for_chat(id)
            .await
            .context("Failed to list messages")?;
        Ok(messages)
    }

    /// List chats, read-through cached unless `no_cache` is set.
    pub async fn list(
        &self,
        filter: &ChatFilter,
        no_cache: bool,
    ) -> Result<Vec<Chat>, ChatServiceError> {
        let key = filter.cache_key();

        if !no_cache {
            match self.cache.get::<Vec<Chat>>(&key).await {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(e) => warn!(error = %e, key, "chat cache read failed"),
            }
        }

        let chats = self
            .chats
            .list(filter)
            .await
            .context("Failed to list chats")?;

        if let Err(e) = self.cache.set(&key, &chats, self.cache_ttl).await {
            warn!(error = %e, key, "chat cache write failed");
        }

        Ok(chats)
    }

    /// Delete a chat and its messages. Owner or admin only.
    pub async fn delete(&self, caller: &User, id: i64) -> Result<(), ChatServiceError> {
        let chat = self.get(id).await?;
        if !caller.can_act_on(chat.user_id) {
            return Err(ChatServiceError::Forbidden(
                "Only the owner or an admin may delete a chat".to_string(),
            ));
        }

        let deleted = self
            .chats
            .delete(id)
            .await
            .context("Failed to delete chat")?;
        if !deleted {
            return Err(ChatServiceError::NotFound(format!("Chat {}", id)));
        }

        self.invalidate_listings().await;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Chat, ChatServiceError> {
        self.chats
            .get_by_id(id)
            .await
            .context("Failed to look up chat")?
            .ok_or_else(|| ChatServiceError::NotFound(format!("Chat {}", id)))
    }

    /// A participant is the owner, an admin, or a user with an active
    /// check-in at the chat's venue.
    async fn ensure_participant(
        &self,
        caller: &User,
        chat: &Chat,
    ) -> Result<(), ChatServiceError> {
        if caller.can_act_on(chat.user_id) {
            return Ok(());
        }

        let co_located = self
            .checkins
            .list(&CheckinFilter {
                venue_id: Some(chat.venue_id),
                user_id: Some(caller.id),
                active: ActiveFilter::Active,
                ..Default::default()
            })
            .await
            .context("Failed to check venue presence")?;

        if co_located.is_empty() {
            return Err(ChatServiceError::Forbidden(
                "Only participants at the venue may act on this chat".to_string(),
            ));
        }
        Ok(())
    }

    async fn invalidate_listings(&self) {
        if let Err(e) = self.cache.delete_pattern("chats:*").await {
            warn!(error = %e, "chat cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::{
        SqlxChatRepository, SqlxCheckinRepository, SqlxJobRepository, SqlxMessageRepository,
        SqlxUserRepository, SqlxVenueRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{Checkin, UserRole};
    use crate::services::notifier::testing::RecordingNotifier;

    struct Fixture {
        pool: DynDatabasePool,
        service: ChatService,
        notifier: Arc<RecordingNotifier>,
        owner: User,
        peer: User,
        stranger: User,
        venue_id: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let mut created = Vec::new();
        for name in ["owner", "peer", "stranger"] {
            created.push(
                users
                    .create(&User::new(
                        name.to_string(),
                        format!("{}@example.com", name),
                        "hash".to_string(),
                        UserRole::Member,
                        None,
                    ))
                    .await
                    .unwrap(),
            );
        }
        let stranger = created.pop().unwrap();
        let peer = created.pop().unwrap();
        let owner = created.pop().unwrap();

        let venues = SqlxVenueRepository::new(pool.clone());
        let venue = venues.create("Corner Bar", &[]).await.unwrap();

        // Peer is checked in at the venue, stranger is not
        let checkins = SqlxCheckinRepository::new(pool.clone());
        let now = Utc::now();
        checkins
            .replace_for_user(&Checkin {
                id: 0,
                venue_id: venue.id,
                user_id: peer.id,
                user_age: 28,
                active: true,
                expires_at: now + Duration::hours(2),
                created_at: now,
            })
            .await
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let cache = Arc::new(Cache::Memory(MemoryCache::new()));
        let service = ChatService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxVenueRepository::boxed(pool.clone()),
            SqlxCheckinRepository::boxed(pool.clone()),
            SqlxChatRepository::boxed(pool.clone()),
            SqlxMessageRepository::boxed(pool.clone()),
            SqlxJobRepository::boxed(pool.clone()),
            cache,
            notifier.clone(),
            &ChatConfig::default(),
            &SessionConfig::default(),
            std::time::Duration::from_secs(300),
        );

        Fixture {
            pool,
            service,
            notifier,
            owner,
            peer,
            stranger,
            venue_id: venue.id,
        }
    }

    fn input(venue_id: i64) -> CreateChatInput {
        CreateChatInput {
            venue_id,
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_enqueues_deactivation_job() {
        let f = setup().await;

        let chat = f.service.create(&f.owner, input(f.venue_id)).await.unwrap();
        assert_eq!(chat.status, ChatStatus::Created);

        let jobs = SqlxJobRepository::new(f.pool.clone());
        let depth = jobs.queue_depth().await.unwrap();
        assert_eq!(depth.pending, 1);

        assert!(matches!(
            f.notifier.events.lock().unwrap()[0],
            ChatEvent::ChatCreated { .. }
        ));
    }

    #[tokio::test]
    async fn test_exclusive_chat_per_user() {
        let f = setup().await;

        let first = f.service.create(&f.owner, input(f.venue_id)).await.unwrap();
        let second = f.service.create(&f.owner, input(f.venue_id)).await.unwrap();

        let all = f
            .service
            .list(
                &ChatFilter {
                    user_id: Some(f.owner.id),
                    active: ActiveFilter::All,
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_ne!(first.id, second.id);
        assert_eq!(all[0].id, second.id);
    }

    #[tokio::test]
    async fn test_peer_accepts_stranger_cannot() {
        let f = setup().await;
        let chat = f.service.create(&f.owner, input(f.venue_id)).await.unwrap();

        let result = f.service.accept(&f.stranger, chat.id).await;
        assert!(matches!(result, Err(ChatServiceError::Forbidden(_))));

        let accepted = f.service.accept(&f.peer, chat.id).await.unwrap();
        assert_eq!(accepted.status, ChatStatus::Accepted);

        // Second accept is no longer valid
        assert!(matches!(
            f.service.accept(&f.peer, chat.id).await,
            Err(ChatServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_send_before_accept_is_rejected() {
        let f = setup().await;
        let chat = f.service.create(&f.owner, input(f.venue_id)).await.unwrap();

        let result = f.service.send_message(&f.owner, chat.id, "hello").await;
        assert!(matches!(result, Err(ChatServiceError::ChatNotYetAccepted)));
    }

    #[tokio::test]
    async fn test_message_cap_flips_to_exhausted() {
        let f = setup().await;
        let chat = f.service.create(&f.owner, input(f.venue_id)).await.unwrap();
        f.service.accept(&f.peer, chat.id).await.unwrap();

        for i in 0..3 {
            f.service
                .send_message(&f.owner, chat.id, &format!("message {}", i))
                .await
                .expect("send within cap failed");
        }

        // Cap reached, status is still accepted
        let before = f
            .service
            .list(
                &ChatFilter {
                    user_id: Some(f.owner.id),
                    active: ActiveFilter::All,
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(before[0].status, ChatStatus::Accepted);

        let over_cap = f.service.send_message(&f.owner, chat.id, "one too many").await;
        assert!(matches!(over_cap, Err(ChatServiceError::ChatExhausted)));

        let after = f
            .service
            .list(
                &ChatFilter {
                    user_id: Some(f.owner.id),
                    active: ActiveFilter::All,
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(after[0].status, ChatStatus::Exhausted);

        // Still exhausted on the next attempt
        assert!(matches!(
            f.service.send_message(&f.owner, chat.id, "again").await,
            Err(ChatServiceError::ChatExhausted)
        ));

        let messages = f.service.messages(&f.owner, chat.id).await.unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn test_reject_closes_the_chat() {
        let f = setup().await;
        let chat = f.service.create(&f.owner, input(f.venue_id)).await.unwrap();

        let rejected = f.service.reject(&f.peer, chat.id).await.unwrap();
        assert_eq!(rejected.status, ChatStatus::Rejected);

        assert!(matches!(
            f.service.send_message(&f.owner, chat.id, "hello?").await,
            Err(ChatServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.reject(&f.peer, chat.id).await,
            Err(ChatServiceError::ValidationError(_))
        ));

        assert!(f
            .notifier
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ChatEvent::ChatRejected { .. })));
    }

    #[tokio::test]
    async fn test_delete_owner_only() {
        let f = setup().await;
        let chat = f.service.create(&f.owner, input(f.venue_id)).await.unwrap();

        assert!(matches!(
            f.service.delete(&f.stranger, chat.id).await,
            Err(ChatServiceError::Forbidden(_))
        ));

        f.service.delete(&f.owner, chat.id).await.unwrap();
        assert!(matches!(
            f.service.delete(&f.owner, chat.id).await,
            Err(ChatServiceError::NotFound(_))
        ));
    }
}
