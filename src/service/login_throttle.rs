use crate::config::{LoginThrottleConfig, StoreErrorPolicy};
use crate::database::attempt_store::{AttemptStore, AttemptStoreError};
use crate::error::app_error::AppError;
use crate::models::attempt::AttemptRecord;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const LOGIN_KEY_PREFIX: &str = "login-attempts";

/// Attempts are keyed by client address rather than account so that guessing
/// against unknown emails is throttled as well.
pub fn login_key(client_ip: &str) -> String {
    format!("{LOGIN_KEY_PREFIX}:{client_ip}")
}

/// What a credential check did to the counter for its key.
#[derive(Debug)]
pub enum LoginOutcome<T> {
    Accepted(T),
    /// `record` is `None` when the store failed and the fail-open policy let
    /// the request continue uncounted.
    Rejected { record: Option<AttemptRecord>, locked: bool },
}

/// Failed-login counter with a fixed lockout window.
///
/// A key is locked once it has `max_attempts` failures inside one window.
/// The window starts at the first failure and is never extended, so a locked
/// key opens again `lockout` after that first failure, or immediately when a
/// login succeeds and clears it.
pub struct LoginThrottle {
    store: Arc<dyn AttemptStore>,
    max_attempts: u32,
    lockout: Duration,
    on_store_error: StoreErrorPolicy,
}

impl LoginThrottle {
    pub fn new(store: Arc<dyn AttemptStore>, config: &LoginThrottleConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_attempts,
            lockout: Duration::from_secs(config.lockout_seconds.max(1)),
            on_store_error: config.on_store_error,
        }
    }

    #[cfg(test)]
    pub fn lockout(&self) -> Duration {
        self.lockout
    }

    #[cfg(test)]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The live record for `key` if it has reached the threshold.
    async fn locked_record(&self, key: &str) -> Result<Option<AttemptRecord>, AttemptStoreError> {
        let record = self.store.get(key).await?;
        Ok(record.filter(|record| record.locked_until(self.max_attempts).is_some()))
    }

    /// `false` only while a live record for `key` has reached the threshold.
    /// Requests go through [`LoginThrottle::guard`], which makes the same
    /// decision and also reports how long the lock lasts.
    #[cfg(test)]
    pub async fn check_allowed(&self, key: &str) -> Result<bool, AttemptStoreError> {
        Ok(self.locked_record(key).await?.is_none())
    }

    pub async fn record_failure(&self, key: &str, lockout: Duration) -> Result<AttemptRecord, AttemptStoreError> {
        self.store.increment(key, lockout).await
    }

    pub async fn clear(&self, key: &str) -> Result<(), AttemptStoreError> {
        self.store.clear(key).await
    }

    #[cfg(test)]
    pub async fn attempts(&self, key: &str) -> Result<u32, AttemptStoreError> {
        Ok(self.store.get(key).await?.map_or(0, |record| record.count))
    }

    /// Called before credentials are looked at.
    pub async fn guard(&self, key: &str) -> Result<(), AppError> {
        match self.locked_record(key).await {
            Ok(Some(record)) => Err(AppError::TooManyLoginAttempts {
                retry_after_secs: record.retry_after_secs(Utc::now()),
            }),
            Ok(None) => Ok(()),
            Err(e) => self.apply_store_error_policy(key, "check", e),
        }
    }

    /// Counts a failed login. Returns the updated record, or `None` when the
    /// store failed and the fail-open policy let the request continue.
    pub async fn register_failure(&self, key: &str) -> Result<Option<AttemptRecord>, AppError> {
        match self.record_failure(key, self.lockout).await {
            Ok(record) => {
                if record.count == self.max_attempts {
                    warn!(key = %key, attempts = record.count, locked_until = %record.expires_at, "login locked out");
                }
                Ok(Some(record))
            }
            Err(e) => self.apply_store_error_policy(key, "record_failure", e).map(|_| None),
        }
    }

    /// The login has already succeeded at this point, so a store error is
    /// only logged.
    pub async fn register_success(&self, key: &str) {
        if let Err(e) = self.clear(key).await {
            warn!(key = %key, error = %e, "failed to clear login attempts");
        }
    }

    /// Books the result of a credential check against `key`: a verified
    /// login clears it, anything else counts as a failure.
    pub async fn settle<T>(&self, key: &str, verified: Option<T>) -> Result<LoginOutcome<T>, AppError> {
        match verified {
            Some(user) => {
                self.register_success(key).await;
                Ok(LoginOutcome::Accepted(user))
            }
            None => {
                let record = self.register_failure(key).await?;
                let locked = record.as_ref().is_some_and(|record| record.locked_until(self.max_attempts).is_some());
                Ok(LoginOutcome::Rejected { record, locked })
            }
        }
    }

    fn apply_store_error_policy(&self, key: &str, operation: &str, e: AttemptStoreError) -> Result<(), AppError> {
        match self.on_store_error {
            StoreErrorPolicy::FailClosed => {
                error!(key = %key, operation, error = %e, "attempt store unavailable, rejecting login");
                Err(AppError::from(e))
            }
            StoreErrorPolicy::FailOpen => {
                warn!(key = %key, operation, error = %e, "attempt store unavailable, login not throttled");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::attempt_store::{Admission, MemoryAttemptStore};
    use crate::models::user::User;
    use async_trait::async_trait;
    use rocket::http::Status;
    use tokio::task::JoinSet;

    const KEY: &str = "login-attempts:10.0.0.7";
    const LOCKOUT: Duration = Duration::from_secs(300);

    fn throttle() -> LoginThrottle {
        LoginThrottle::new(Arc::new(MemoryAttemptStore::new()), &LoginThrottleConfig::default())
    }

    struct FailingStore;

    #[async_trait]
    impl AttemptStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<AttemptRecord>, AttemptStoreError> {
            Err(AttemptStoreError::Unavailable("connection refused".to_string()))
        }

        async fn increment(&self, _key: &str, _ttl: Duration) -> Result<AttemptRecord, AttemptStoreError> {
            Err(AttemptStoreError::Unavailable("connection refused".to_string()))
        }

        async fn increment_all_if_below(&self, _keys: &[String], _limit: u32, _ttl: Duration) -> Result<Admission, AttemptStoreError> {
            Err(AttemptStoreError::Unavailable("connection refused".to_string()))
        }

        async fn clear(&self, _key: &str) -> Result<(), AttemptStoreError> {
            Err(AttemptStoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn failing_throttle(on_store_error: StoreErrorPolicy) -> LoginThrottle {
        let config = LoginThrottleConfig {
            on_store_error,
            ..LoginThrottleConfig::default()
        };
        LoginThrottle::new(Arc::new(FailingStore), &config)
    }

    #[test]
    fn key_is_prefixed_client_ip() {
        assert_eq!(login_key("192.168.1.20"), "login-attempts:192.168.1.20");
    }

    #[tokio::test]
    async fn no_record_is_allowed() {
        assert!(throttle().check_allowed(KEY).await.unwrap());
    }

    #[tokio::test]
    async fn four_failures_allowed_five_locked() {
        let throttle = throttle();
        for _ in 0..4 {
            throttle.record_failure(KEY, LOCKOUT).await.unwrap();
        }
        assert!(throttle.check_allowed(KEY).await.unwrap());

        throttle.record_failure(KEY, LOCKOUT).await.unwrap();
        assert!(!throttle.check_allowed(KEY).await.unwrap());
    }

    #[tokio::test]
    async fn clear_reopens_a_locked_key() {
        let throttle = throttle();
        for _ in 0..7 {
            throttle.record_failure(KEY, LOCKOUT).await.unwrap();
        }
        assert!(!throttle.check_allowed(KEY).await.unwrap());

        throttle.clear(KEY).await.unwrap();
        assert!(throttle.check_allowed(KEY).await.unwrap());
        assert_eq!(throttle.attempts(KEY).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_expires_with_the_window() {
        let throttle = throttle();
        for _ in 0..5 {
            throttle.record_failure(KEY, LOCKOUT).await.unwrap();
        }
        assert!(!throttle.check_allowed(KEY).await.unwrap());

        tokio::time::advance(LOCKOUT - Duration::from_secs(1)).await;
        assert!(!throttle.check_allowed(KEY).await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(throttle.check_allowed(KEY).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn later_failures_do_not_extend_the_lock() {
        let throttle = throttle();
        for _ in 0..5 {
            throttle.record_failure(KEY, LOCKOUT).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(250)).await;
        throttle.record_failure(KEY, LOCKOUT).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(throttle.check_allowed(KEY).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_are_all_counted() {
        let throttle = Arc::new(throttle());
        let mut tasks = JoinSet::new();
        for _ in 0..10 {
            let throttle = Arc::clone(&throttle);
            tasks.spawn(async move { throttle.record_failure(KEY, LOCKOUT).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(throttle.attempts(KEY).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn guard_reports_retry_after_when_locked() {
        let throttle = throttle();
        throttle.guard(KEY).await.unwrap();
        for _ in 0..5 {
            throttle.register_failure(KEY).await.unwrap();
        }

        match throttle.guard(KEY).await {
            Err(AppError::TooManyLoginAttempts { retry_after_secs }) => assert!((1..=300).contains(&retry_after_secs)),
            other => panic!("expected lockout, got {other:?}"),
        }

        throttle.register_success(KEY).await;
        throttle.guard(KEY).await.unwrap();
    }

    #[tokio::test]
    async fn guard_and_check_allowed_agree_at_the_threshold() {
        let throttle = throttle();
        for attempt in 1..=6 {
            throttle.record_failure(KEY, throttle.lockout()).await.unwrap();
            let allowed = throttle.check_allowed(KEY).await.unwrap();
            assert_eq!(throttle.guard(KEY).await.is_ok(), allowed, "attempt {attempt}");
            assert_eq!(allowed, attempt < throttle.max_attempts());
        }
    }

    #[tokio::test]
    async fn verified_login_clears_earlier_failures() {
        let throttle = throttle();
        let user = crate::test_utils::sample_user("free");
        for _ in 0..4 {
            assert!(matches!(
                throttle.settle(KEY, None::<User>).await.unwrap(),
                LoginOutcome::Rejected { locked: false, .. }
            ));
        }
        assert_eq!(throttle.attempts(KEY).await.unwrap(), 4);

        match throttle.settle(KEY, Some(user.clone())).await.unwrap() {
            LoginOutcome::Accepted(accepted) => assert_eq!(accepted.id, user.id),
            other => panic!("expected acceptance, got {other:?}"),
        }
        assert_eq!(throttle.attempts(KEY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fifth_rejection_reports_the_lock() {
        let throttle = throttle();
        for _ in 0..4 {
            throttle.settle(KEY, None::<User>).await.unwrap();
        }
        match throttle.settle(KEY, None::<User>).await.unwrap() {
            LoginOutcome::Rejected { record, locked } => {
                assert!(locked);
                assert_eq!(record.map(|record| record.count), Some(5));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(throttle.guard(KEY).await.is_err());
    }

    #[tokio::test]
    async fn store_failure_is_an_error_not_an_allow() {
        let throttle = failing_throttle(StoreErrorPolicy::FailClosed);
        assert!(throttle.check_allowed(KEY).await.is_err());
        assert!(throttle.record_failure(KEY, LOCKOUT).await.is_err());
    }

    #[tokio::test]
    async fn fail_closed_rejects_with_service_unavailable() {
        let throttle = failing_throttle(StoreErrorPolicy::FailClosed);

        let err = throttle.guard(KEY).await.unwrap_err();
        assert_eq!(Status::from(&err), Status::ServiceUnavailable);

        let err = throttle.register_failure(KEY).await.unwrap_err();
        assert!(matches!(err, AppError::ThrottleUnavailable { .. }));
    }

    #[tokio::test]
    async fn fail_open_lets_the_attempt_through() {
        let throttle = failing_throttle(StoreErrorPolicy::FailOpen);
        throttle.guard(KEY).await.unwrap();
        assert!(throttle.register_failure(KEY).await.unwrap().is_none());
        throttle.register_success(KEY).await;
    }
}
