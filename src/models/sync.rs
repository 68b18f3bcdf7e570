use chrono::{DateTime, Duration, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default, JsonSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum SyncFrequency {
    Realtime,
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl SyncFrequency {
    pub fn interval(self) -> Duration {
        match self {
            SyncFrequency::Realtime => Duration::minutes(5),
            SyncFrequency::Hourly => Duration::hours(1),
            SyncFrequency::Daily => Duration::days(1),
            SyncFrequency::Weekly => Duration::weeks(1),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default, JsonSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum SyncDirection {
    NotionToSheets,
    SheetsToNotion,
    #[default]
    Both,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default, JsonSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Active,
    Paused,
    Error,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserSync {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub notion_database_id: String,
    pub sheet_id: String,
    pub mapping: Json<Value>,
    pub filters: Json<Value>,
    pub frequency: SyncFrequency,
    pub sync_direction: SyncDirection,
    pub status: SyncStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserSync {
    /// A sync is due when it never ran or its frequency interval has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync {
            None => true,
            Some(last) => now - last >= self.frequency.interval(),
        }
    }
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct SyncRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub notion_database_id: String,
    #[validate(length(min = 1, max = 255))]
    pub sheet_id: String,
    #[serde(default = "empty_object")]
    #[validate(custom(function = "validate_json_object"))]
    pub mapping: Value,
    #[serde(default = "empty_object")]
    #[validate(custom(function = "validate_json_object"))]
    pub filters: Value,
    #[serde(default)]
    pub frequency: SyncFrequency,
    #[serde(default)]
    pub sync_direction: SyncDirection,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn validate_json_object(value: &Value) -> Result<(), ValidationError> {
    if value.is_object() {
        return Ok(());
    }
    Err(ValidationError::new("must_be_object"))
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct SyncResponse {
    pub id: Uuid,
    pub name: String,
    pub notion_database_id: String,
    pub sheet_id: String,
    pub mapping: Value,
    pub filters: Value,
    pub frequency: SyncFrequency,
    pub sync_direction: SyncDirection,
    pub status: SyncStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&UserSync> for SyncResponse {
    fn from(sync: &UserSync) -> Self {
        Self {
            id: sync.id,
            name: sync.name.clone(),
            notion_database_id: sync.notion_database_id.clone(),
            sheet_id: sync.sheet_id.clone(),
            mapping: sync.mapping.0.clone(),
            filters: sync.filters.0.clone(),
            frequency: sync.frequency,
            sync_direction: sync.sync_direction,
            status: sync.status,
            last_sync: sync.last_sync,
            created_at: sync.created_at,
        }
    }
}
