//! Deadline arithmetic for the check-in cycle.
//!
//! Everything here is pure and takes `now` explicitly. All comparisons are in
//! UTC; `DateTime<Utc>` values read from storage are already normalized.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Time left until a deadline, split into whole days and residual hours (0..=23).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Remaining {
    pub days: i64,
    pub hours: i64,
}

/// `last + cycle_days`, or `None` when liveness tracking has not started.
pub fn next_deadline(last_check_in: Option<DateTime<Utc>>, cycle_days: i32) -> Option<DateTime<Utc>> {
    last_check_in.map(|last| last + Duration::days(cycle_days as i64))
}

/// Cycle deadline plus the grace period; the instant after which a user is overdue.
pub fn full_deadline(
    last_check_in: Option<DateTime<Utc>>,
    cycle_days: i32,
    grace_hours: i32,
) -> Option<DateTime<Utc>> {
    next_deadline(last_check_in, cycle_days).map(|d| d + Duration::hours(grace_hours as i64))
}

/// `None` without a deadline; zero once the deadline is reached.
pub fn remaining(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Remaining> {
    let deadline = deadline?;
    let secs = (deadline - now).num_seconds();
    if secs <= 0 {
        return Some(Remaining { days: 0, hours: 0 });
    }
    Some(Remaining {
        days: secs / 86_400,
        hours: (secs % 86_400) / 3_600,
    })
}

/// Strictly after `last + cycle + grace`. Never overdue without a baseline check-in.
pub fn is_overdue(
    last_check_in: Option<DateTime<Utc>>,
    cycle_days: i32,
    grace_hours: i32,
    now: DateTime<Utc>,
) -> bool {
    full_deadline(last_check_in, cycle_days, grace_hours)
        .map(|deadline| now > deadline)
        .unwrap_or(false)
}

/// Whole days elapsed since `since`, floored.
pub fn days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days()
}

/// Whole hours until `deadline`, truncated toward zero.
pub fn hours_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (deadline - now).num_hours()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_next_deadline() {
        assert_eq!(next_deadline(None, 7), None);
        for cycle in [7, 14, 30] {
            assert_eq!(
                next_deadline(Some(t0()), cycle),
                Some(t0() + Duration::days(cycle as i64))
            );
        }
    }

    #[test]
    fn test_overdue_threshold() {
        let last = Some(t0());
        let base = t0() + Duration::days(7);
        assert!(!is_overdue(last, 7, 48, base + Duration::hours(47) + Duration::minutes(59)));
        assert!(!is_overdue(last, 7, 48, base + Duration::hours(48)));
        assert!(is_overdue(last, 7, 48, base + Duration::hours(48) + Duration::seconds(1)));
        assert!(!is_overdue(None, 7, 48, base + Duration::days(365)));
    }

    #[test]
    fn test_remaining() {
        let deadline = Some(t0());
        assert_eq!(remaining(None, t0()), None);
        assert_eq!(remaining(deadline, t0()), Some(Remaining { days: 0, hours: 0 }));
        assert_eq!(
            remaining(deadline, t0() + Duration::hours(5)),
            Some(Remaining { days: 0, hours: 0 })
        );
        assert_eq!(
            remaining(deadline, t0() - Duration::hours(50) - Duration::minutes(30)),
            Some(Remaining { days: 2, hours: 2 })
        );
    }

    #[test]
    fn test_days_and_hours() {
        assert_eq!(days_since(t0(), t0() + Duration::days(10) - Duration::seconds(1)), 9);
        assert_eq!(days_since(t0(), t0() + Duration::days(10)), 10);
        assert_eq!(hours_until(t0() + Duration::minutes(25 * 60 + 40), t0()), 25);
    }
}
