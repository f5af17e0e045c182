//! Venue model
//!
//! Venues own a weekly schedule that bounds how long a check-in may live:
//! a session never outlasts the venue's closing time for the current day.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A physical venue users check in at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    /// Unique identifier
    pub id: i64,
    /// Venue name
    pub name: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// One weekday's opening hours.
///
/// Times are minutes from midnight. A `closes_at` greater than 1440 means
/// the venue closes after midnight (e.g. 1560 = 02:00 the next day).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Weekday, 1 = Monday .. 7 = Sunday
    pub weekday: u32,
    /// Opening time in minutes from midnight
    pub opens_at: i64,
    /// Closing time in minutes from midnight, may exceed 1440
    pub closes_at: i64,
}

/// Time remaining before the venue closes today, capped at `ceiling`.
///
/// When the schedule has no entry for the current weekday the ceiling alone
/// applies. When the venue has already closed the result is zero.
pub fn max_time_per_check(
    schedule: &[ScheduleEntry],
    now: DateTime<Utc>,
    ceiling: Duration,
) -> Duration {
    let weekday = now.weekday().number_from_monday();
    let Some(entry) = schedule.iter().find(|e| e.weekday == weekday) else {
        return ceiling;
    };

    let now_secs = i64::from(now.num_seconds_from_midnight());
    let close_secs = entry.closes_at * 60;
    let remaining = Duration::seconds((close_secs - now_secs).max(0));

    remaining.min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CEILING: Duration = Duration::hours(18);

    // 2024-01-01 is a Monday.
    fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_closing_time_bounds_session() {
        // Closes at 22:00, checked in at 20:00 -> two hours left
        let schedule = [ScheduleEntry {
            weekday: 1,
            opens_at: 9 * 60,
            closes_at: 22 * 60,
        }];
        let remaining = max_time_per_check(&schedule, monday_at(20, 0), CEILING);
        assert_eq!(remaining, Duration::hours(2));
    }

    #[test]
    fn test_ceiling_applies_when_closing_is_far() {
        // Closes at 23:30, checked in at 00:30 -> 23h left, capped at 18h
        let schedule = [ScheduleEntry {
            weekday: 1,
            opens_at: 0,
            closes_at: 23 * 60 + 30,
        }];
        let remaining = max_time_per_check(&schedule, monday_at(0, 30), CEILING);
        assert_eq!(remaining, CEILING);
    }

    #[test]
    fn test_no_entry_for_today_uses_ceiling() {
        // Schedule only covers Tuesday
        let schedule = [ScheduleEntry {
            weekday: 2,
            opens_at: 9 * 60,
            closes_at: 18 * 60,
        }];
        let remaining = max_time_per_check(&schedule, monday_at(12, 0), CEILING);
        assert_eq!(remaining, CEILING);
    }

    #[test]
    fn test_empty_schedule_uses_ceiling() {
        let remaining = max_time_per_check(&[], monday_at(12, 0), CEILING);
        assert_eq!(remaining, CEILING);
    }

    #[test]
    fn test_close_past_midnight() {
        // Closes at 02:00 the next day (1560 minutes), checked in at 23:00
        let schedule = [ScheduleEntry {
            weekday: 1,
            opens_at: 18 * 60,
            closes_at: 26 * 60,
        }];
        let remaining = max_time_per_check(&schedule, monday_at(23, 0), CEILING);
        assert_eq!(remaining, Duration::hours(3));
    }

    #[test]
    fn test_already_closed_is_zero() {
        // Closes at 17:00, checked in at 20:00
        let schedule = [ScheduleEntry {
            weekday: 1,
            opens_at: 9 * 60,
            closes_at: 17 * 60,
        }];
        let remaining = max_time_per_check(&schedule, monday_at(20, 0), CEILING);
        assert_eq!(remaining, Duration::zero());
    }
}
