use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::sync_log::{SYNC_LOGS_PER_PAGE, SyncLog, SyncLogPage, page_offset};
use uuid::Uuid;

impl PostgresRepository {
    /// Newest first. The caller is responsible for checking the sync belongs to the user.
    pub async fn list_sync_logs(&self, sync_id: &Uuid, page: i64) -> Result<SyncLogPage, AppError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_logs WHERE sync_id = $1")
            .bind(sync_id)
            .fetch_one(&self.pool)
            .await?;

        let logs = sqlx::query_as::<_, SyncLog>(
            r#"
            SELECT id, sync_id, status, message, rows_processed, duration_seconds, created_at
            FROM sync_logs
            WHERE sync_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(sync_id)
        .bind(SYNC_LOGS_PER_PAGE)
        .bind(page_offset(page, SYNC_LOGS_PER_PAGE))
        .fetch_all(&self.pool)
        .await?;

        Ok(SyncLogPage::new(logs, total, page.max(1)))
    }
}
