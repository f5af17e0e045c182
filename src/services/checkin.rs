//! Check-in service
//!
//! Business rules for proximity sessions: authorization, age capture,
//! venue-bounded expiry and the one-active-check-in-per-user guarantee.
//! Listings are read-through cached under filter-derived keys; every write
//! invalidates the `checkins:*` namespace.

use crate::cache::{Cache, CacheLayer};
use crate::config::SessionConfig;
use crate::db::repositories::{CheckinRepository, UserRepository, VenueRepository};
use crate::models::{max_time_per_check, Checkin, CheckinFilter, User};
use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::warn;

/// Error types for check-in operations
#[derive(Debug, thiserror::Error)]
pub enum CheckinServiceError {
    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller may not perform this operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invalid input
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Check-in creation input.
#[derive(Debug, Clone)]
pub struct CreateCheckinInput {
    pub venue_id: i64,
    /// Defaults to the caller; only admins may set someone else
    pub user_id: Option<i64>,
}

/// Check-in service.
pub struct CheckinService {
    users: Arc<dyn UserRepository>,
    venues: Arc<dyn VenueRepository>,
    checkins: Arc<dyn CheckinRepository>,
    cache: Arc<Cache>,
    max_duration: Duration,
    default_user_age: i64,
    cache_ttl: std::time::Duration,
}

impl CheckinService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        venues: Arc<dyn VenueRepository>,
        checkins: Arc<dyn CheckinRepository>,
        cache: Arc<Cache>,
        config: &SessionConfig,
        cache_ttl: std::time::Duration,
    ) -> Self {
        Self {
            users,
            venues,
            checkins,
            cache,
            max_duration: Duration::seconds(config.max_duration_seconds as i64),
            default_user_age: config.default_user_age,
            cache_ttl,
        }
    }

    /// Check a user in at a venue.
    ///
    /// Replaces any existing check-in by the same user in one transaction.
    /// Expiry is whichever comes first: the venue closing or the configured
    /// ceiling, both computed here at creation time.
    pub async fn create(
        &self,
        caller: &User,
        input: CreateCheckinInput,
    ) -> Result<Checkin, CheckinServiceError> {
        let target_id = input.user_id.unwrap_or(caller.id);
        if !caller.can_act_on(target_id) {
            return Err(CheckinServiceError::Forbidden(
                "Cannot check in on behalf of another user".to_string(),
            ));
        }

        let user = self
            .users
            .get_by_id(target_id)
            .await
            .context("Failed to look up user")?
            .ok_or_else(|| CheckinServiceError::NotFound(format!("User {}", target_id)))?;

        let venue = self
            .venues
            .get_by_id(input.venue_id)
            .await
            .context("Failed to look up venue")?
            .ok_or_else(|| CheckinServiceError::NotFound(format!("Venue {}", input.venue_id)))?;

        let schedule = self
            .venues
            .schedule(venue.id)
            .await
            .context("Failed to load venue schedule")?;

        let now = Utc::now();
        let allowed = max_time_per_check(&schedule, now, self.max_duration);
        if allowed <= Duration::zero() {
            return Err(CheckinServiceError::ValidationError(format!(
                "Venue '{}' is closed",
                venue.name
            )));
        }

        let age = user.age_years(now).unwrap_or(self.default_user_age);
        let checkin = Checkin {
            id: 0,
            venue_id: venue.id,
            user_id: user.id,
            user_age: age,
            active: true,
            expires_at: now + allowed,
            created_at: now,
        };

        let created = self
            .checkins
            .replace_for_user(&checkin)
            .await
            .context("Failed to store check-in")?;

        self.invalidate_listings().await;
        Ok(created)
    }

    /// List check-ins, read-through cached unless `no_cache` is set.
    pub async fn list(
        &self,
        filter: &CheckinFilter,
        no_cache: bool,
    ) -> Result<Vec<Checkin>, CheckinServiceError> {
        let key = filter.cache_key();

        if !no_cache {
            match self.cache.get::<Vec<Checkin>>(&key).await {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(e) => warn!(error = %e, key, "check-in cache read failed"),
            }
        }

        let checkins = self
            .checkins
            .list(filter)
            .await
            .context("Failed to list check-ins")?;

        if let Err(e) = self.cache.set(&key, &checkins, self.cache_ttl).await {
            warn!(error = %e, key, "check-in cache write failed");
        }

        Ok(checkins)
    }

    /// Delete a check-in. Owner or admin only.
    pub async fn delete(&self, caller: &User, id: i64) -> Result<(), CheckinServiceError> {
        let checkin = self
            .checkins
            .get_by_id(id)
            .await
            .context("Failed to look up check-in")?
            .ok_or_else(|| CheckinServiceError::NotFound(format!("Check-in {}", id)))?;

        if !caller.can_act_on(checkin.user_id) {
            return Err(CheckinServiceError::Forbidden(
                "Only the owner or an admin may delete a check-in".to_string(),
            ));
        }

        let deleted = self
            .checkins
            .delete(id)
            .await
            .context("Failed to delete check-in")?;
        if !deleted {
            return Err(CheckinServiceError::NotFound(format!("Check-in {}", id)));
        }

        self.invalidate_listings().await;
        Ok(())
    }

    async fn invalidate_listings(&self) {
        if let Err(e) = self.cache.delete_pattern("checkins:*").await {
            warn!(error = %e, "check-in cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::{
        SqlxCheckinRepository, SqlxUserRepository, SqlxVenueRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{ActiveFilter, ScheduleEntry, UserRole};
    use chrono::Datelike;

    struct Fixture {
        pool: DynDatabasePool,
        service: CheckinService,
        member: User,
        other: User,
        admin: User,
        venue_id: i64,
    }

    async fn setup_with_config(config: SessionConfig) -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let member = users
            .create(&User::new(
                "casual".to_string(),
                "casual@example.com".to_string(),
                "hash".to_string(),
                UserRole::Member,
                None,
            ))
            .await
            .unwrap();
        let other = users
            .create(&User::new(
                "stranger".to_string(),
                "stranger@example.com".to_string(),
                "hash".to_string(),
                UserRole::Member,
                None,
            ))
            .await
            .unwrap();
        let admin = users
            .create(&User::new(
                "boss".to_string(),
                "boss@example.com".to_string(),
                "hash".to_string(),
                UserRole::Admin,
                None,
            ))
            .await
            .unwrap();

        let venues = SqlxVenueRepository::new(pool.clone());
        let venue = venues.create("Test Venue", &[]).await.unwrap();

        let cache = Arc::new(Cache::Memory(MemoryCache::new()));
        let service = CheckinService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxVenueRepository::boxed(pool.clone()),
            SqlxCheckinRepository::boxed(pool.clone()),
            cache,
            &config,
            std::time::Duration::from_secs(300),
        );

        Fixture {
            pool,
            service,
            member,
            other,
            admin,
            venue_id: venue.id,
        }
    }

    async fn setup() -> Fixture {
        setup_with_config(SessionConfig::default()).await
    }

    fn input(venue_id: i64) -> CreateCheckinInput {
        CreateCheckinInput {
            venue_id,
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_sequential_checkins_keep_one_active() {
        let f = setup().await;

        for _ in 0..3 {
            f.service
                .create(&f.member, input(f.venue_id))
                .await
                .expect("create failed");
        }

        let active = f
            .service
            .list(
                &CheckinFilter {
                    user_id: Some(f.member.id),
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_member_cannot_check_in_for_other() {
        let f = setup().await;

        let result = f
            .service
            .create(
                &f.member,
                CreateCheckinInput {
                    venue_id: f.venue_id,
                    user_id: Some(f.other.id),
                },
            )
            .await;
        assert!(matches!(result, Err(CheckinServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_admin_can_check_in_for_other() {
        let f = setup().await;

        let checkin = f
            .service
            .create(
                &f.admin,
                CreateCheckinInput {
                    venue_id: f.venue_id,
                    user_id: Some(f.member.id),
                },
            )
            .await
            .expect("admin create failed");
        assert_eq!(checkin.user_id, f.member.id);
    }

    #[tokio::test]
    async fn test_unknown_venue_is_not_found() {
        let f = setup().await;
        let result = f.service.create(&f.member, input(999)).await;
        assert!(matches!(result, Err(CheckinServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expiry_bounded_by_ceiling() {
        let f = setup_with_config(SessionConfig {
            max_duration_seconds: 3600,
            ..Default::default()
        })
        .await;

        let checkin = f.service.create(&f.member, input(f.venue_id)).await.unwrap();
        let duration = checkin.expires_at - checkin.created_at;
        assert_eq!(duration.num_seconds(), 3600);
    }

    #[tokio::test]
    async fn test_closed_venue_rejected() {
        let f = setup().await;

        let venues = SqlxVenueRepository::new(f.pool.clone());
        let today = Utc::now().weekday().number_from_monday();
        let closed = venues
            .create(
                "Closed Today",
                &[ScheduleEntry {
                    weekday: today,
                    opens_at: 0,
                    closes_at: 0,
                }],
            )
            .await
            .unwrap();

        let result = f.service.create(&f.member, input(closed.id)).await;
        assert!(matches!(
            result,
            Err(CheckinServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_list_cache_and_bypass() {
        let f = setup().await;
        f.service.create(&f.member, input(f.venue_id)).await.unwrap();

        let filter = CheckinFilter {
            active: ActiveFilter::All,
            ..Default::default()
        };
        let primed = f.service.list(&filter, false).await.unwrap();
        assert_eq!(primed.len(), 1);

        // Insert behind the service's back; the cached listing stays stale
        // until bypassed.
        let repo = SqlxCheckinRepository::new(f.pool.clone());
        let now = Utc::now();
        repo.replace_for_user(&Checkin {
            id: 0,
            venue_id: f.venue_id,
            user_id: f.other.id,
            user_age: 30,
            active: true,
            expires_at: now + Duration::hours(1),
            created_at: now,
        })
        .await
        .unwrap();

        let cached = f.service.list(&filter, false).await.unwrap();
        assert_eq!(cached.len(), 1);

        let fresh = f.service.list(&filter, true).await.unwrap();
        assert_eq!(fresh.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_owner_and_admin_only() {
        let f = setup().await;
        let checkin = f.service.create(&f.member, input(f.venue_id)).await.unwrap();

        let result = f.service.delete(&f.other, checkin.id).await;
        assert!(matches!(result, Err(CheckinServiceError::Forbidden(_))));

        f.service
            .delete(&f.member, checkin.id)
            .await
            .expect("owner delete failed");
        assert!(matches!(
            f.service.delete(&f.admin, checkin.id).await,
            Err(CheckinServiceError::NotFound(_))
        ));
    }
}
