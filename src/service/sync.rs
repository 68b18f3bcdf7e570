use crate::database::sync::{SyncCreation, SyncRepository};
use crate::error::app_error::AppError;
use crate::models::sync::{SyncRequest, UserSync};
use crate::service::user_locks::UserLocks;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SyncService<'a, R: SyncRepository> {
    repository: &'a R,
    locks: &'a UserLocks,
}

impl<'a, R: SyncRepository> SyncService<'a, R> {
    pub fn new(repository: &'a R, locks: &'a UserLocks) -> Self {
        SyncService { repository, locks }
    }

    /// Creates a sync if the user's plan has room for it.
    ///
    /// Counting, deciding and inserting is a check-then-act sequence. The
    /// per-user lock keeps two requests in this process from both reading
    /// the same count; the repository closes the same gap across processes.
    pub async fn create_sync(&self, user_id: &Uuid, request: &SyncRequest) -> Result<UserSync, AppError> {
        let _guard = self.locks.lock(*user_id).await;

        match self.repository.create_sync_within_quota(user_id, request).await? {
            SyncCreation::Created(sync) => {
                info!(user_id = %user_id, sync_id = %sync.id, "sync created");
                Ok(sync)
            }
            SyncCreation::LimitReached { plan, current } => {
                warn!(user_id = %user_id, plan = %plan, current, "sync limit reached");
                Err(AppError::SyncLimitReached { plan })
            }
        }
    }

    pub async fn list_syncs(&self, user_id: &Uuid) -> Result<Vec<UserSync>, AppError> {
        self.repository.list_syncs(user_id).await
    }

    pub async fn get_sync(&self, id: &Uuid, user_id: &Uuid) -> Result<UserSync, AppError> {
        self.repository
            .get_sync(id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Sync not found".to_string()))
    }

    pub async fn delete_sync(&self, id: &Uuid, user_id: &Uuid) -> Result<(), AppError> {
        if self.repository.delete_sync(id, user_id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound("Sync not found".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockRepository, sample_sync_request};
    use std::sync::Arc;
    use tokio::task::JoinSet;

    async fn create_concurrently(repository: Arc<MockRepository>, locks: Option<Arc<UserLocks>>, user_id: Uuid, attempts: usize) -> usize {
        let mut tasks = JoinSet::new();
        for i in 0..attempts {
            let repository = Arc::clone(&repository);
            let locks = locks.clone();
            tasks.spawn(async move {
                let request = sample_sync_request(&format!("sync-{i}"));
                match locks {
                    Some(locks) => SyncService::new(repository.as_ref(), locks.as_ref()).create_sync(&user_id, &request).await.is_ok(),
                    None => matches!(repository.create_sync_within_quota(&user_id, &request).await, Ok(SyncCreation::Created(_))),
                }
            });
        }

        let mut created = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                created += 1;
            }
        }
        created
    }

    #[tokio::test]
    async fn racy_repository_oversubscribes_without_the_lock() {
        let user_id = Uuid::new_v4();
        let repository = Arc::new(MockRepository::with_plan(user_id, "starter"));

        let created = create_concurrently(Arc::clone(&repository), None, user_id, 10).await;
        assert!(created > 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_for_starter_stop_at_three() {
        let user_id = Uuid::new_v4();
        let repository = Arc::new(MockRepository::with_plan(user_id, "starter"));
        let locks = Arc::new(UserLocks::new());

        let created = create_concurrently(Arc::clone(&repository), Some(Arc::clone(&locks)), user_id, 10).await;

        assert_eq!(created, 3);
        assert_eq!(repository.count_for(&user_id).await, 3);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn free_plan_second_create_is_rejected() {
        let user_id = Uuid::new_v4();
        let repository = MockRepository::with_plan(user_id, "free");
        let locks = UserLocks::new();
        let service = SyncService::new(&repository, &locks);

        service.create_sync(&user_id, &sample_sync_request("first")).await.unwrap();
        let err = service.create_sync(&user_id, &sample_sync_request("second")).await.unwrap_err();
        assert!(matches!(err, AppError::SyncLimitReached { ref plan } if plan == "free"));
    }

    #[tokio::test]
    async fn unknown_plan_cannot_create() {
        let user_id = Uuid::new_v4();
        let repository = MockRepository::with_plan(user_id, "legacy");
        let locks = UserLocks::new();
        let service = SyncService::new(&repository, &locks);

        assert!(service.create_sync(&user_id, &sample_sync_request("first")).await.is_err());
        assert_eq!(repository.count_for(&user_id).await, 0);
    }

    #[tokio::test]
    async fn get_and_delete_are_scoped_to_owner() {
        let owner = Uuid::new_v4();
        let repository = MockRepository::with_plan(owner, "pro");
        let locks = UserLocks::new();
        let service = SyncService::new(&repository, &locks);
        let sync = service.create_sync(&owner, &sample_sync_request("tasks")).await.unwrap();

        let stranger = Uuid::new_v4();
        assert!(matches!(service.get_sync(&sync.id, &stranger).await, Err(AppError::NotFound(_))));
        assert!(matches!(service.delete_sync(&sync.id, &stranger).await, Err(AppError::NotFound(_))));

        assert_eq!(service.get_sync(&sync.id, &owner).await.unwrap().name, "tasks");
        service.delete_sync(&sync.id, &owner).await.unwrap();
        assert!(service.list_syncs(&owner).await.unwrap().is_empty());
    }
}
