use crate::config::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::sync::{SyncCreation, SyncRepository};
use crate::error::app_error::AppError;
use crate::models::sync::{SyncDirection, SyncFrequency, SyncRequest, SyncStatus, UserSync};
use crate::models::user::User;
use crate::service::plan_quota;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

pub fn sample_user(plan_type: &str) -> User {
    User {
        id: Uuid::new_v4(),
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
        plan_type: plan_type.to_string(),
        subscription_status: "free".to_string(),
        created_at: Utc::now(),
    }
}

pub fn sample_sync(user_id: Uuid) -> UserSync {
    UserSync {
        id: Uuid::new_v4(),
        user_id,
        name: "Reading list".to_string(),
        notion_database_id: "notion-db-1".to_string(),
        sheet_id: "sheet-1".to_string(),
        mapping: Json(json!({ "Title": "A", "Status": "B" })),
        filters: Json(json!({})),
        frequency: SyncFrequency::Daily,
        sync_direction: SyncDirection::Both,
        status: SyncStatus::Active,
        last_sync: None,
        created_at: Utc::now(),
    }
}

pub fn sample_sync_request(name: &str) -> SyncRequest {
    SyncRequest {
        name: name.to_string(),
        notion_database_id: "notion-db-1".to_string(),
        sheet_id: "sheet-1".to_string(),
        mapping: json!({ "Title": "A" }),
        filters: json!({}),
        frequency: SyncFrequency::Hourly,
        sync_direction: SyncDirection::NotionToSheets,
    }
}

/// In-memory sync store for a single user.
///
/// `create_sync_within_quota` deliberately yields between counting and
/// inserting, so callers that don't serialise creation will oversubscribe.
pub struct MockRepository {
    user_id: Uuid,
    plan_type: String,
    syncs: Mutex<Vec<UserSync>>,
}

impl MockRepository {
    pub fn with_plan(user_id: Uuid, plan_type: &str) -> Self {
        Self {
            user_id,
            plan_type: plan_type.to_string(),
            syncs: Mutex::new(Vec::new()),
        }
    }

    pub async fn count_for(&self, user_id: &Uuid) -> usize {
        self.syncs.lock().await.iter().filter(|sync| &sync.user_id == user_id).count()
    }
}

#[async_trait::async_trait]
impl SyncRepository for MockRepository {
    async fn create_sync_within_quota(&self, user_id: &Uuid, request: &SyncRequest) -> Result<SyncCreation, AppError> {
        if user_id != &self.user_id {
            return Err(AppError::UserNotFound);
        }

        let current = self.count_for(user_id).await as i64;
        tokio::task::yield_now().await;

        if !plan_quota::can_create(&self.plan_type, current) {
            return Ok(SyncCreation::LimitReached {
                plan: self.plan_type.clone(),
                current,
            });
        }

        let sync = UserSync {
            name: request.name.clone(),
            notion_database_id: request.notion_database_id.clone(),
            sheet_id: request.sheet_id.clone(),
            mapping: Json(request.mapping.clone()),
            filters: Json(request.filters.clone()),
            frequency: request.frequency,
            sync_direction: request.sync_direction,
            ..sample_sync(*user_id)
        };
        self.syncs.lock().await.push(sync.clone());
        Ok(SyncCreation::Created(sync))
    }

    async fn list_syncs(&self, user_id: &Uuid) -> Result<Vec<UserSync>, AppError> {
        Ok(self.syncs.lock().await.iter().filter(|sync| &sync.user_id == user_id).cloned().collect())
    }

    async fn get_sync(&self, id: &Uuid, user_id: &Uuid) -> Result<Option<UserSync>, AppError> {
        Ok(self
            .syncs
            .lock()
            .await
            .iter()
            .find(|sync| &sync.id == id && &sync.user_id == user_id)
            .cloned())
    }

    async fn delete_sync(&self, id: &Uuid, user_id: &Uuid) -> Result<bool, AppError> {
        let mut syncs = self.syncs.lock().await;
        let before = syncs.len();
        syncs.retain(|sync| !(&sync.id == id && &sync.user_id == user_id));
        Ok(syncs.len() < before)
    }
}

/// Repository over `DATABASE_URL`, for the tests marked `requires database`.
pub async fn database_repository() -> PostgresRepository {
    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| Config::default().database.url);
    let pool = PgPool::connect(&url).await.expect("database reachable");
    PostgresRepository { pool }
}

/// Registers a throwaway account with password `Secret123` on `plan_type`.
pub async fn database_user(repo: &PostgresRepository, plan_type: &str) -> User {
    let email = format!("test-{}@example.com", Uuid::new_v4());
    let user = repo.create_user("Test User", &email, "Secret123").await.expect("user created");
    sqlx::query("UPDATE users SET plan_type = $1 WHERE id = $2")
        .bind(plan_type)
        .bind(user.id)
        .execute(&repo.pool)
        .await
        .expect("plan updated");
    User {
        plan_type: plan_type.to_string(),
        ..user
    }
}

pub async fn remove_database_user(repo: &PostgresRepository, user_id: &Uuid) {
    for statement in [
        "DELETE FROM syncs WHERE user_id = $1",
        "DELETE FROM user_session WHERE user_id = $1",
        "DELETE FROM security_audit_log WHERE user_id = $1",
        "DELETE FROM users WHERE id = $1",
    ] {
        sqlx::query(statement).bind(user_id).execute(&repo.pool).await.expect("cleanup");
    }
}
