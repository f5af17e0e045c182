//! User model
//!
//! Users are the owners of check-ins and chats. The role determines whether
//! a caller may act on resources owned by other users.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Username (unique)
    pub username: String,
    /// Email address (unique)
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// User role
    pub role: UserRole,
    /// Birthdate, used to derive the age recorded on check-ins and chats
    pub birthdate: Option<NaiveDate>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: String,
        email: String,
        password_hash: String,
        role: UserRole,
        birthdate: Option<NaiveDate>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // assigned by the database
            username,
            email,
            password_hash,
            role,
            birthdate,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the user is an administrator
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Check if the user may mutate a resource owned by `owner_id`.
    ///
    /// Admins may act on anyone's resources; members only on their own.
    pub fn can_act_on(&self, owner_id: i64) -> bool {
        self.is_admin() || self.id == owner_id
    }

    /// Age in whole years at `now`, floored. `None` when no birthdate is set.
    pub fn age_years(&self, now: DateTime<Utc>) -> Option<i64> {
        let birth = self.birthdate?;
        let today = now.date_naive();
        let mut years = i64::from(today.year()) - i64::from(birth.year());
        if (today.month(), today.day()) < (birth.month(), birth.day()) {
            years -= 1;
        }
        Some(years.max(0))
    }
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Administrator - may act on any user's resources
    Admin,
    /// Regular member - may only act on own resources
    #[default]
    Member,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Member => write!(f, "member"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "member" => Ok(UserRole::Member),
            _ => Err(anyhow::anyhow!("Invalid user role: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user_with_birthdate(birthdate: Option<NaiveDate>) -> User {
        User::new(
            "ana".to_string(),
            "ana@example.com".to_string(),
            "hash".to_string(),
            UserRole::Member,
            birthdate,
        )
    }

    #[test]
    fn test_age_years_floors() {
        let user = user_with_birthdate(NaiveDate::from_ymd_opt(1990, 6, 15));

        // Day before the birthday
        let now = Utc.with_ymd_and_hms(2020, 6, 14, 12, 0, 0).unwrap();
        assert_eq!(user.age_years(now), Some(29));

        // On the birthday
        let now = Utc.with_ymd_and_hms(2020, 6, 15, 0, 0, 0).unwrap();
        assert_eq!(user.age_years(now), Some(30));
    }

    #[test]
    fn test_age_years_without_birthdate() {
        let user = user_with_birthdate(None);
        assert_eq!(user.age_years(Utc::now()), None);
    }

    #[test]
    fn test_can_act_on() {
        let mut admin = user_with_birthdate(None);
        admin.id = 1;
        admin.role = UserRole::Admin;

        let mut member = user_with_birthdate(None);
        member.id = 2;

        assert!(admin.can_act_on(2));
        assert!(admin.can_act_on(999));
        assert!(member.can_act_on(2));
        assert!(!member.can_act_on(1));
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!(UserRole::from_str("admin").unwrap(), UserRole::Admin);
        assert_eq!(UserRole::from_str("MEMBER").unwrap(), UserRole::Member);
        assert!(UserRole::from_str("owner").is_err());
        assert_eq!(UserRole::Admin.to_string(), "admin");
        assert_eq!(UserRole::Member.to_string(), "member");
    }
}
