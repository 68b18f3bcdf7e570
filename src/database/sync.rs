use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::sync::{SyncRequest, UserSync};
use crate::service::plan_quota;
use sqlx::types::Json;
use uuid::Uuid;

const SYNC_COLUMNS: &str = "id, user_id, name, notion_database_id, sheet_id, mapping, filters, frequency, sync_direction, status, last_sync, created_at";

/// Result of a quota-checked insert.
#[derive(Debug)]
pub enum SyncCreation {
    Created(UserSync),
    LimitReached { plan: String, current: i64 },
}

#[async_trait::async_trait]
pub trait SyncRepository: Send + Sync {
    /// Count the user's syncs, check the plan quota and insert, as one unit.
    /// Implementations must not let two concurrent calls both pass the check
    /// on the same count.
    async fn create_sync_within_quota(&self, user_id: &Uuid, request: &SyncRequest) -> Result<SyncCreation, AppError>;
    async fn list_syncs(&self, user_id: &Uuid) -> Result<Vec<UserSync>, AppError>;
    async fn get_sync(&self, id: &Uuid, user_id: &Uuid) -> Result<Option<UserSync>, AppError>;
    async fn delete_sync(&self, id: &Uuid, user_id: &Uuid) -> Result<bool, AppError>;
}

#[async_trait::async_trait]
impl SyncRepository for PostgresRepository {
    async fn create_sync_within_quota(&self, user_id: &Uuid, request: &SyncRequest) -> Result<SyncCreation, AppError> {
        let mut tx = self.pool.begin().await?;

        // The row lock on the owner serialises concurrent creations for the
        // same user across every instance sharing this database.
        let plan: String = sqlx::query_scalar("SELECT plan_type FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::UserNotFound)?;

        let current: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM syncs WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

        if !plan_quota::can_create(&plan, current) {
            tx.rollback().await?;
            return Ok(SyncCreation::LimitReached { plan, current });
        }

        let sync = sqlx::query_as::<_, UserSync>(&format!(
            r#"
            INSERT INTO syncs (user_id, name, notion_database_id, sheet_id, mapping, filters, frequency, sync_direction, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active')
            RETURNING {SYNC_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&request.name)
        .bind(&request.notion_database_id)
        .bind(&request.sheet_id)
        .bind(Json(&request.mapping))
        .bind(Json(&request.filters))
        .bind(request.frequency)
        .bind(request.sync_direction)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SyncCreation::Created(sync))
    }

    async fn list_syncs(&self, user_id: &Uuid) -> Result<Vec<UserSync>, AppError> {
        let syncs = sqlx::query_as::<_, UserSync>(&format!("SELECT {SYNC_COLUMNS} FROM syncs WHERE user_id = $1 ORDER BY created_at DESC"))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(syncs)
    }

    async fn get_sync(&self, id: &Uuid, user_id: &Uuid) -> Result<Option<UserSync>, AppError> {
        let sync = sqlx::query_as::<_, UserSync>(&format!("SELECT {SYNC_COLUMNS} FROM syncs WHERE id = $1 AND user_id = $2"))
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sync)
    }

    async fn delete_sync(&self, id: &Uuid, user_id: &Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM syncs WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
