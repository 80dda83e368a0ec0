//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Lowest possible `added_at` value, used when an item has no timestamp
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

/// Whole days elapsed between `then` and `now` (negative if `then` is in the future)
pub fn age_in_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - then).num_seconds() as f64 / 86_400.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_millis_to_duration_one_second() {
        let duration = millis_to_duration(1000);
        assert_eq!(duration, Duration::from_secs(1));
    }

    #[test]
    fn test_epoch_is_zero() {
        assert_eq!(epoch().timestamp(), 0);
    }

    #[test]
    fn test_age_in_days() {
        let now = now();
        let then = now - ChronoDuration::days(10);
        assert!((age_in_days(then, now) - 10.0).abs() < 1e-9);

        let later = now + ChronoDuration::hours(12);
        assert!(age_in_days(later, now) < 0.0);
    }
}
