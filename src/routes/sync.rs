use crate::auth::CurrentUser;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::middleware::ClientIp;
use crate::middleware::rate_limit::RateLimit;
use crate::models::audit::audit_events;
use crate::models::sync::{SyncRequest, SyncResponse};
use crate::models::sync_log::SyncLogPage;
use crate::service::sync::SyncService;
use crate::service::user_locks::UserLocks;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_okapi::openapi;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

#[allow(clippy::result_large_err)]
fn parse_sync_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|e| AppError::uuid("Invalid sync id", e))
}

#[openapi(tag = "Syncs")]
#[get("/")]
pub async fn list_syncs(
    pool: &State<PgPool>,
    locks: &State<UserLocks>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
) -> Result<Json<Vec<SyncResponse>>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let syncs = SyncService::new(&repo, locks).list_syncs(&current_user.id).await?;
    Ok(Json(syncs.iter().map(SyncResponse::from).collect()))
}

/// Create a sync. Returns 403 when the user's plan has no room for another one.
#[openapi(tag = "Syncs")]
#[post("/", data = "<payload>")]
pub async fn create_sync(
    pool: &State<PgPool>,
    locks: &State<UserLocks>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    client_ip: ClientIp,
    payload: Json<SyncRequest>,
) -> Result<(Status, Json<SyncResponse>), AppError> {
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    match SyncService::new(&repo, locks).create_sync(&current_user.id, &payload).await {
        Ok(sync) => {
            let _ = repo
                .create_security_audit_log(
                    Some(&current_user.id),
                    audit_events::SYNC_CREATED,
                    true,
                    client_ip.0,
                    Some(serde_json::json!({ "sync_id": sync.id })),
                )
                .await;
            Ok((Status::Created, Json(SyncResponse::from(&sync))))
        }
        Err(AppError::SyncLimitReached { plan }) => {
            let _ = repo
                .create_security_audit_log(
                    Some(&current_user.id),
                    audit_events::SYNC_LIMIT_REACHED,
                    false,
                    client_ip.0,
                    Some(serde_json::json!({ "plan": &plan })),
                )
                .await;
            Err(AppError::SyncLimitReached { plan })
        }
        Err(e) => Err(e),
    }
}

#[openapi(tag = "Syncs")]
#[get("/<id>")]
pub async fn get_sync(
    pool: &State<PgPool>,
    locks: &State<UserLocks>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
) -> Result<Json<SyncResponse>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let sync_id = parse_sync_id(id)?;
    let sync = SyncService::new(&repo, locks).get_sync(&sync_id, &current_user.id).await?;
    Ok(Json(SyncResponse::from(&sync)))
}

#[openapi(tag = "Syncs")]
#[delete("/<id>")]
pub async fn delete_sync(pool: &State<PgPool>, locks: &State<UserLocks>, _rate_limit: RateLimit, current_user: CurrentUser, id: &str) -> Result<Status, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let sync_id = parse_sync_id(id)?;
    SyncService::new(&repo, locks).delete_sync(&sync_id, &current_user.id).await?;
    Ok(Status::NoContent)
}

/// Run history for one of the user's syncs, newest first, 20 per page.
#[openapi(tag = "Syncs")]
#[get("/<id>/logs?<page>")]
pub async fn list_sync_logs(
    pool: &State<PgPool>,
    locks: &State<UserLocks>,
    _rate_limit: RateLimit,
    current_user: CurrentUser,
    id: &str,
    page: Option<i64>,
) -> Result<Json<SyncLogPage>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let sync_id = parse_sync_id(id)?;
    // Ownership check before exposing any logs.
    SyncService::new(&repo, locks).get_sync(&sync_id, &current_user.id).await?;
    Ok(Json(repo.list_sync_logs(&sync_id, page.unwrap_or(1)).await?))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![list_syncs, create_sync, get_sync, delete_sync, list_sync_logs]
}
