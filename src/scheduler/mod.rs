//! Expiry scheduler
//!
//! Background worker that fires durable deactivation jobs and sweeps
//! expired rows. Job firing is idempotent: a missing or already-terminal
//! chat completes the job without touching the row, and the status update
//! itself is guarded on non-terminal states.
//!
//! The scheduler is an explicit object with `start()` / `shutdown()`;
//! nothing here is process-global.

use crate::cache::{Cache, CacheLayer};
use crate::config::SchedulerConfig;
use crate::db::repositories::{
    AuthSessionRepository, ChatRepository, CheckinRepository, JobRepository,
};
use crate::models::{ChatStatus, DeactivationJob};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Jobs claimed per tick.
const CLAIM_BATCH: i64 = 100;

/// Expired chats swept per tick, independent of their jobs.
const SWEEP_BATCH: i64 = 500;

/// Background expiry worker.
pub struct ExpiryScheduler {
    jobs: Arc<dyn JobRepository>,
    chats: Arc<dyn ChatRepository>,
    checkins: Arc<dyn CheckinRepository>,
    auth_sessions: Arc<dyn AuthSessionRepository>,
    cache: Arc<Cache>,
    config: SchedulerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl ExpiryScheduler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        chats: Arc<dyn ChatRepository>,
        checkins: Arc<dyn CheckinRepository>,
        auth_sessions: Arc<dyn AuthSessionRepository>,
        cache: Arc<Cache>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs,
            chats,
            checkins,
            auth_sessions,
            cache,
            config,
            shutdown_tx,
        }
    }

    /// Spawn the worker loop. The returned handle completes after
    /// `shutdown()` is called and the current tick finishes.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let period = std::time::Duration::from_secs(scheduler.config.poll_interval_seconds);
            let mut ticker = tokio::time::interval(period);
            info!(
                poll_interval_seconds = scheduler.config.poll_interval_seconds,
                "expiry scheduler started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.run_tick().await {
                            error!(error = %e, "expiry scheduler tick failed");
                        }
                    }
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("expiry scheduler stopped");
        })
    }

    /// Signal the worker loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One scheduler pass: fire due jobs, sweep expired rows, report depth.
    pub async fn run_tick(&self) -> Result<()> {
        let now = Utc::now();

        let due = self.jobs.due(now, CLAIM_BATCH).await?;
        for job in &due {
            self.process_job(job).await;
        }

        self.sweep(now).await;
        self.report_queue_depth().await;
        Ok(())
    }

    /// Fire a single deactivation job.
    ///
    /// Store errors follow the retry policy: exponential backoff until the
    /// attempt budget is spent, then the job is parked as failed.
    async fn process_job(&self, job: &DeactivationJob) {
        match self.force_expire(job.chat_id).await {
            Ok(expired) => {
                if expired {
                    debug!(job_id = job.id, chat_id = job.chat_id, "chat expired");
                }
                if let Err(e) = self.jobs.mark_done(job.id).await {
                    error!(job_id = job.id, error = %e, "failed to complete job");
                }
            }
            Err(e) => {
                let attempts = job.attempts + 1;
                if attempts >= self.config.max_attempts {
                    error!(
                        job_id = job.id,
                        chat_id = job.chat_id,
                        attempts,
                        error = %e,
                        "deactivation job failed permanently"
                    );
                    if let Err(e) = self
                        .jobs
                        .mark_failed(job.id, attempts, &e.to_string())
                        .await
                    {
                        error!(job_id = job.id, error = %e, "failed to park job");
                    }
                } else {
                    let delay = self.backoff(job.attempts);
                    warn!(
                        job_id = job.id,
                        chat_id = job.chat_id,
                        attempts,
                        delay_seconds = delay.num_seconds(),
                        error = %e,
                        "deactivation job failed, retrying"
                    );
                    if let Err(e) = self
                        .jobs
                        .reschedule(job.id, attempts, Utc::now() + delay, &e.to_string())
                        .await
                    {
                        error!(job_id = job.id, error = %e, "failed to reschedule job");
                    }
                }
            }
        }
    }

    /// Move a chat to `expired` unless it is gone or already terminal.
    /// Returns whether the row actually changed.
    async fn force_expire(&self, chat_id: i64) -> Result<bool> {
        let chat = match self.chats.get_by_id(chat_id).await? {
            Some(chat) => chat,
            None => return Ok(false),
        };
        if chat.status.is_terminal() {
            return Ok(false);
        }

        let updated = self
            .chats
            .update_status(
                chat_id,
                &[ChatStatus::Created, ChatStatus::Accepted],
                ChatStatus::Expired,
            )
            .await?;

        if updated {
            // Cache invalidation failure must not fail the job
            if let Err(e) = self.cache.delete_pattern("chats:*").await {
                warn!(chat_id, error = %e, "chat cache invalidation failed");
            }
        }
        Ok(updated)
    }

    fn backoff(&self, attempts: i64) -> Duration {
        let shift = attempts.clamp(0, 16) as u32;
        let secs = self
            .config
            .backoff_base_seconds
            .saturating_mul(1u64 << shift);
        Duration::seconds(secs as i64)
    }

    /// Drop rows whose expiry has passed: check-ins, stale auth sessions,
    /// and chats whose jobs were lost.
    async fn sweep(&self, now: chrono::DateTime<chrono::Utc>) {
        match self.checkins.delete_expired(now).await {
            Ok(0) => {}
            Ok(removed) => {
                debug!(removed, "swept expired check-ins");
                if let Err(e) = self.cache.delete_pattern("checkins:*").await {
                    warn!(error = %e, "check-in cache invalidation failed");
                }
            }
            Err(e) => error!(error = %e, "check-in sweep failed"),
        }

        if let Err(e) = self.auth_sessions.delete_expired().await {
            error!(error = %e, "auth session sweep failed");
        }

        match self.chats.expired_ids(now, SWEEP_BATCH).await {
            Ok(ids) => {
                for id in ids {
                    if let Err(e) = self.force_expire(id).await {
                        error!(chat_id = id, error = %e, "chat expiry sweep failed");
                    }
                }
            }
            Err(e) => error!(error = %e, "chat sweep failed"),
        }
    }

    async fn report_queue_depth(&self) {
        match self.jobs.queue_depth().await {
            Ok(depth) => {
                debug!(pending = depth.pending, failed = depth.failed, "job queue depth");
                if depth.pending > self.config.warn_pending_depth {
                    warn!(
                        pending = depth.pending,
                        threshold = self.config.warn_pending_depth,
                        "deactivation job backlog is growing"
                    );
                }
                if depth.failed > self.config.warn_failed_depth {
                    warn!(
                        failed = depth.failed,
                        threshold = self.config.warn_failed_depth,
                        "failed deactivation jobs are accumulating"
                    );
                }
            }
            Err(e) => error!(error = %e, "failed to read queue depth"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::{
        SqlxAuthSessionRepository, SqlxChatRepository, SqlxCheckinRepository, SqlxJobRepository,
        SqlxUserRepository, SqlxVenueRepository, UserRepository, VenueRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{Chat, Checkin, JobStatus, User, UserRole};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::DateTime;

    struct Fixture {
        pool: DynDatabasePool,
        scheduler: ExpiryScheduler,
        user_id: i64,
        venue_id: i64,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let user = users
            .create(&User::new(
                "sam".to_string(),
                "sam@example.com".to_string(),
                "hash".to_string(),
                UserRole::Member,
                None,
            ))
            .await
            .unwrap();

        let venues = SqlxVenueRepository::new(pool.clone());
        let venue = venues.create("Night Market", &[]).await.unwrap();

        let scheduler = ExpiryScheduler::new(
            SqlxJobRepository::boxed(pool.clone()),
            SqlxChatRepository::boxed(pool.clone()),
            SqlxCheckinRepository::boxed(pool.clone()),
            SqlxAuthSessionRepository::boxed(pool.clone()),
            Arc::new(Cache::Memory(MemoryCache::new())),
            SchedulerConfig::default(),
        );

        Fixture {
            pool,
            scheduler,
            user_id: user.id,
            venue_id: venue.id,
        }
    }

    async fn overdue_chat(f: &Fixture, status: ChatStatus) -> Chat {
        let chats = SqlxChatRepository::new(f.pool.clone());
        let now = Utc::now();
        let chat = chats
            .replace_for_user(&Chat {
                id: 0,
                venue_id: f.venue_id,
                user_id: f.user_id,
                user_age: 30,
                status: ChatStatus::Created,
                active: true,
                expires_at: now - Duration::minutes(5),
                created_at: now - Duration::hours(1),
            })
            .await
            .unwrap();
        if status != ChatStatus::Created {
            chats
                .update_status(chat.id, &[ChatStatus::Created], status)
                .await
                .unwrap();
        }
        chats.get_by_id(chat.id).await.unwrap().unwrap()
    }

    fn due_job(chat_id: i64) -> DeactivationJob {
        let now = Utc::now();
        DeactivationJob {
            id: 0,
            chat_id,
            run_at: now - Duration::minutes(1),
            attempts: 0,
            status: JobStatus::Pending,
            last_error: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_due_job_expires_chat() {
        let f = setup().await;
        let chat = overdue_chat(&f, ChatStatus::Created).await;

        let jobs = SqlxJobRepository::new(f.pool.clone());
        let job = jobs.enqueue(&due_job(chat.id)).await.unwrap();

        f.scheduler.run_tick().await.unwrap();

        let chats = SqlxChatRepository::new(f.pool.clone());
        let stored = chats.get_by_id(chat.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChatStatus::Expired);
        assert_eq!(
            jobs.get_by_id(job.id).await.unwrap().unwrap().status,
            JobStatus::Done
        );
    }

    #[tokio::test]
    async fn test_double_fire_is_idempotent() {
        let f = setup().await;
        let chat = overdue_chat(&f, ChatStatus::Accepted).await;

        let jobs = SqlxJobRepository::new(f.pool.clone());
        jobs.enqueue(&due_job(chat.id)).await.unwrap();
        let second = jobs.enqueue(&due_job(chat.id)).await.unwrap();

        f.scheduler.run_tick().await.unwrap();
        f.scheduler.run_tick().await.unwrap();

        let chats = SqlxChatRepository::new(f.pool.clone());
        let stored = chats.get_by_id(chat.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChatStatus::Expired);
        assert_eq!(
            jobs.get_by_id(second.id).await.unwrap().unwrap().status,
            JobStatus::Done
        );
        assert_eq!(jobs.queue_depth().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_terminal_chat_is_left_alone() {
        let f = setup().await;
        let chat = overdue_chat(&f, ChatStatus::Rejected).await;

        let jobs = SqlxJobRepository::new(f.pool.clone());
        let job = jobs.enqueue(&due_job(chat.id)).await.unwrap();

        f.scheduler.run_tick().await.unwrap();

        let chats = SqlxChatRepository::new(f.pool.clone());
        let stored = chats.get_by_id(chat.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChatStatus::Rejected);
        assert_eq!(
            jobs.get_by_id(job.id).await.unwrap().unwrap().status,
            JobStatus::Done
        );
    }

    #[tokio::test]
    async fn test_sweep_expires_chat_without_job() {
        let f = setup().await;
        let chat = overdue_chat(&f, ChatStatus::Created).await;

        f.scheduler.run_tick().await.unwrap();

        let chats = SqlxChatRepository::new(f.pool.clone());
        let stored = chats.get_by_id(chat.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ChatStatus::Expired);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_checkins() {
        let f = setup().await;
        let checkins = SqlxCheckinRepository::new(f.pool.clone());
        let now = Utc::now();
        let stale = checkins
            .replace_for_user(&Checkin {
                id: 0,
                venue_id: f.venue_id,
                user_id: f.user_id,
                user_age: 30,
                active: true,
                expires_at: now - Duration::hours(1),
                created_at: now - Duration::hours(2),
            })
            .await
            .unwrap();

        f.scheduler.run_tick().await.unwrap();

        assert!(checkins.get_by_id(stale.id).await.unwrap().is_none());
    }

    /// Chat repository stub that fails every call.
    struct FailingChats;

    #[async_trait]
    impl ChatRepository for FailingChats {
        async fn replace_for_user(&self, _chat: &Chat) -> Result<Chat> {
            Err(anyhow!("store unavailable"))
        }
        async fn get_by_id(&self, _id: i64) -> Result<Option<Chat>> {
            Err(anyhow!("store unavailable"))
        }
        async fn update_status(
            &self,
            _id: i64,
            _expected: &[ChatStatus],
            _next: ChatStatus,
        ) -> Result<bool> {
            Err(anyhow!("store unavailable"))
        }
        async fn list(&self, _filter: &crate::models::ChatFilter) -> Result<Vec<Chat>> {
            Err(anyhow!("store unavailable"))
        }
        async fn delete(&self, _id: i64) -> Result<bool> {
            Err(anyhow!("store unavailable"))
        }
        async fn expired_ids(
            &self,
            _now: DateTime<Utc>,
            _limit: i64,
        ) -> Result<Vec<i64>> {
            Err(anyhow!("store unavailable"))
        }
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off_then_parks() {
        let f = setup().await;
        let chat = overdue_chat(&f, ChatStatus::Created).await;

        let jobs = SqlxJobRepository::new(f.pool.clone());
        let job = jobs.enqueue(&due_job(chat.id)).await.unwrap();

        let flaky = ExpiryScheduler::new(
            SqlxJobRepository::boxed(f.pool.clone()),
            Arc::new(FailingChats),
            SqlxCheckinRepository::boxed(f.pool.clone()),
            SqlxAuthSessionRepository::boxed(f.pool.clone()),
            Arc::new(Cache::Memory(MemoryCache::new())),
            SchedulerConfig {
                max_attempts: 3,
                backoff_base_seconds: 60,
                ..Default::default()
            },
        );

        // First failure: rescheduled with backoff
        flaky.process_job(&job).await;
        let stored = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(stored.run_at > Utc::now());
        assert!(stored.last_error.is_some());

        // Second failure doubles the delay
        flaky.process_job(&stored).await;
        let stored = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 2);

        // Final failure parks the job
        flaky.process_job(&stored).await;
        let stored = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 3);
    }

    #[tokio::test]
    async fn test_backoff_doubles_per_attempt() {
        let f = setup().await;
        assert_eq!(f.scheduler.backoff(0).num_seconds(), 60);
        assert_eq!(f.scheduler.backoff(1).num_seconds(), 120);
        assert_eq!(f.scheduler.backoff(2).num_seconds(), 240);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let f = setup().await;
        let scheduler = Arc::new(f.scheduler);

        let handle = scheduler.start();
        scheduler.shutdown();
        handle.await.expect("scheduler task panicked");
    }
}
