//! User service
//!
//! Registration, login/logout and auth session validation. Tokens are
//! random UUIDs stored server-side with an absolute expiry.

use crate::config::SessionConfig;
use crate::db::repositories::{AuthSessionRepository, UserRepository};
use crate::models::{AuthSession, User, UserRole};
use crate::services::password::{hash_password, verify_password};
use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Authentication failed (invalid credentials)
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// User already exists
    #[error("User already exists: {0}")]
    UserExists(String),

    /// Auth session expired
    #[error("Session expired")]
    SessionExpired,

    /// Auth session not found
    #[error("Session not found")]
    SessionNotFound,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Registration input.
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub birthdate: Option<NaiveDate>,
}

/// User service for registration and authentication.
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    auth_repo: Arc<dyn AuthSessionRepository>,
    token_lifetime: Duration,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        auth_repo: Arc<dyn AuthSessionRepository>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            user_repo,
            auth_repo,
            token_lifetime: Duration::seconds(config.auth_token_seconds as i64),
        }
    }

    /// Register a new member account.
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        if input.username.trim().is_empty() {
            return Err(UserServiceError::ValidationError(
                "Username cannot be empty".to_string(),
            ));
        }
        if input.email.trim().is_empty() || !input.email.contains('@') {
            return Err(UserServiceError::ValidationError(
                "A valid email is required".to_string(),
            ));
        }
        if input.password.len() < 8 {
            return Err(UserServiceError::ValidationError(
                "Password must be at least 8 characters".to_string(),
            ));
        }

        if self
            .user_repo
            .get_by_username(&input.username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Username '{}' is already taken",
                input.username
            )));
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;
        let user = User::new(
            input.username,
            input.email,
            password_hash,
            UserRole::Member,
            input.birthdate,
        );

        let created = self
            .user_repo
            .create(&user)
            .await
            .context("Failed to create user")?;
        Ok(created)
    }

    /// Verify credentials and open an auth session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(User, AuthSession), UserServiceError> {
        let user = self
            .user_repo
            .get_by_username(username)
            .await
            .context("Failed to look up user")?
            .ok_or_else(|| {
                UserServiceError::AuthenticationError("Invalid username or password".to_string())
            })?;

        let valid = verify_password(password, &user.password_hash)
            .context("Failed to verify password")?;
        if !valid {
            return Err(UserServiceError::AuthenticationError(
                "Invalid username or password".to_string(),
            ));
        }

        let now = Utc::now();
        let session = AuthSession {
            id: Uuid::new_v4().to_string(),
            user_id: user.id,
            expires_at: now + self.token_lifetime,
            created_at: now,
        };
        let session = self
            .auth_repo
            .create(&session)
            .await
            .context("Failed to create auth session")?;

        Ok((user, session))
    }

    /// Close an auth session. Unknown tokens are a no-op.
    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.auth_repo
            .delete(token)
            .await
            .context("Failed to delete auth session")?;
        Ok(())
    }

    /// Resolve a token to its user, dropping the session if it has expired.
    pub async fn validate_session(&self, token: &str) -> Result<User, UserServiceError> {
        let session = self
            .auth_repo
            .get_by_id(token)
            .await
            .context("Failed to look up auth session")?
            .ok_or(UserServiceError::SessionNotFound)?;

        if session.is_expired() {
            self.auth_repo
                .delete(token)
                .await
                .context("Failed to delete expired session")?;
            return Err(UserServiceError::SessionExpired);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to look up session user")?
            .ok_or(UserServiceError::SessionNotFound)?;

        Ok(user)
    }
}
