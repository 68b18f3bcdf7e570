use chrono::{DateTime, Utc};
use rocket::serde::Serialize;
use schemars::JsonSchema;
use uuid::Uuid;

pub const SYNC_LOGS_PER_PAGE: i64 = 20;

#[derive(Serialize, Debug, Clone, sqlx::FromRow, JsonSchema)]
pub struct SyncLog {
    pub id: Uuid,
    pub sync_id: Uuid,
    pub status: String,
    pub message: Option<String>,
    pub rows_processed: i32,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct SyncLogPage {
    pub logs: Vec<SyncLog>,
    pub total: i64,
    pub pages: i64,
    pub current_page: i64,
}

impl SyncLogPage {
    pub fn new(logs: Vec<SyncLog>, total: i64, current_page: i64) -> Self {
        Self {
            logs,
            total,
            pages: page_count(total, SYNC_LOGS_PER_PAGE),
            current_page,
        }
    }
}

/// Pages are 1-based; anything below 1 is treated as the first page. Offsets
/// past the end saturate, which simply yields an empty page.
pub fn page_offset(page: i64, per_page: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(per_page.max(0))
}

fn page_count(total: i64, per_page: i64) -> i64 {
    if total <= 0 { 0 } else { (total + per_page - 1) / per_page }
}
