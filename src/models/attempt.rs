use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counter state for one throttled key inside its current window.
///
/// The window is fixed: it starts at the first counted attempt and ends at
/// `expires_at`, after which the record behaves as if it never existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub key: String,
    pub count: u32,
    pub expires_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// End of the lockout when `count` has reached `threshold`.
    pub fn locked_until(&self, threshold: u32) -> Option<DateTime<Utc>> {
        (self.count >= threshold).then_some(self.expires_at)
    }

    pub fn is_locked(&self, threshold: u32, now: DateTime<Utc>) -> bool {
        self.locked_until(threshold).is_some_and(|until| until > now)
    }

    /// Whole seconds until the window closes, never less than one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let remaining = (self.expires_at - now).num_seconds();
        u64::try_from(remaining).unwrap_or(0).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(count: u32, expires_in: i64) -> (AttemptRecord, DateTime<Utc>) {
        let now = Utc::now();
        (
            AttemptRecord {
                key: "login-attempts:10.0.0.1".to_string(),
                count,
                expires_at: now + Duration::seconds(expires_in),
            },
            now,
        )
    }

    #[test]
    fn locked_only_at_threshold() {
        let (below, now) = record(4, 300);
        assert!(below.locked_until(5).is_none());
        assert!(!below.is_locked(5, now));

        let (at, now) = record(5, 300);
        assert_eq!(at.locked_until(5), Some(at.expires_at));
        assert!(at.is_locked(5, now));
    }

    #[test]
    fn lock_in_the_past_is_not_locked() {
        let (stale, now) = record(9, -1);
        assert!(!stale.is_locked(5, now));
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let (rec, now) = record(5, 120);
        assert_eq!(rec.retry_after_secs(now), 120);

        let (expired, now) = record(5, -10);
        assert_eq!(expired.retry_after_secs(now), 1);
    }
}
