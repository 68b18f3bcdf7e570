use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per user, created on demand.
///
/// Entries are removed when the last holder releases, so the map only ever
/// contains users with an operation in flight.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn lock(&self, user_id: Uuid) -> UserLockGuard<'_> {
        let mutex = Arc::clone(self.map().entry(user_id).or_default());
        let guard = mutex.lock_owned().await;
        UserLockGuard { locks: self, user_id, guard }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map().len()
    }
}

pub struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    user_id: Uuid,
    guard: OwnedMutexGuard<()>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        // Two references left means the map and this guard: nobody is waiting.
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            map.remove(&self.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn entry_is_dropped_after_release() {
        let locks = UserLocks::new();
        let user_id = Uuid::new_v4();
        {
            let _guard = locks.lock(user_id).await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let locks = UserLocks::new();
        let _first = locks.lock(Uuid::new_v4()).await;
        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock(Uuid::new_v4())).await;
        assert!(second.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn same_user_waits_for_the_holder() {
        let locks = Arc::new(UserLocks::new());
        let user_id = Uuid::new_v4();
        let guard = locks.lock(user_id).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(user_id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
