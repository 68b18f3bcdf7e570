use chrono::{DateTime, Utc};
use rocket::serde::Serialize;
use schemars::JsonSchema;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncLimitState {
    Available,
    Reached,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct DashboardResponse {
    pub total_syncs: i64,
    pub active_syncs: i64,
    pub due_syncs: i64,
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_limit: SyncLimitState,
    pub plan: String,
    /// -1 means unlimited.
    pub max_syncs: i64,
    pub subscribed: bool,
}
