use crate::auth::{CurrentUser, SESSION_COOKIE, build_session_cookie};
use crate::config::{Config, SessionConfig};
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::middleware::ClientIp;
use crate::middleware::rate_limit::RateLimit;
use crate::models::audit::audit_events;
use crate::models::user::{LoginRequest, RegisterRequest, User, UserResponse};
use crate::service::login_throttle::{LoginOutcome, LoginThrottle, login_key};
use chrono::{DateTime, Duration, Utc};
use rocket::http::{Cookie, CookieJar, Status};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use sqlx::PgPool;
use validator::Validate;

fn session_expiry(config: &SessionConfig, remember: bool, now: DateTime<Utc>) -> DateTime<Utc> {
    if remember {
        now + Duration::days(config.remember_days)
    } else {
        now + Duration::hours(config.ttl_hours)
    }
}

async fn start_session(repo: &PostgresRepository, config: &SessionConfig, cookies: &CookieJar<'_>, user: &User, remember: bool) -> Result<(), AppError> {
    let expires_at = session_expiry(config, remember, Utc::now());
    let session = repo.create_session(&user.id, expires_at).await?;
    cookies.add_private(build_session_cookie(&session.id, &user.id, session.expires_at));
    Ok(())
}

/// Register a new account on the free plan and log it in.
#[openapi(tag = "Users")]
#[post("/", data = "<payload>")]
pub async fn post_user(
    pool: &State<PgPool>,
    config: &State<Config>,
    _rate_limit: RateLimit,
    client_ip: ClientIp,
    cookies: &CookieJar<'_>,
    payload: Json<RegisterRequest>,
) -> Result<(Status, Json<UserResponse>), AppError> {
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };
    let user = repo.create_user(&payload.name, &payload.email, &payload.password).await?;
    start_session(&repo, &config.session, cookies, &user, false).await?;

    let _ = repo
        .create_security_audit_log(Some(&user.id), audit_events::REGISTERED, true, client_ip.0, None)
        .await;

    Ok((Status::Created, Json(UserResponse::from(&user))))
}

/// Log in with email and password.
///
/// Failed attempts are counted per client address. After too many failures
/// the address is locked out for a while and gets 429 with `Retry-After`.
#[openapi(tag = "Users")]
#[post("/login", data = "<payload>")]
pub async fn post_user_login(
    pool: &State<PgPool>,
    config: &State<Config>,
    throttle: &State<LoginThrottle>,
    client_ip: ClientIp,
    cookies: &CookieJar<'_>,
    payload: Json<LoginRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let ip = match client_ip.0 {
        Some(ip) => ip,
        None if config.rate_limit.require_client_ip => return Err(AppError::BadRequest("Client address unavailable".to_string())),
        None => "missing-ip".to_string(),
    };
    let key = login_key(&ip);

    throttle.guard(&key).await?;
    payload.validate()?;

    let repo = PostgresRepository { pool: pool.inner().clone() };

    let user = match repo.get_user_by_email(&payload.email).await? {
        Some(user) => match repo.verify_password(&user, &payload.password).await {
            Ok(()) => Some(user),
            Err(AppError::InvalidCredentials) => None,
            Err(e) => return Err(e),
        },
        None => {
            PostgresRepository::dummy_verify(&payload.password);
            None
        }
    };

    let user = match throttle.settle(&key, user).await? {
        LoginOutcome::Accepted(user) => user,
        LoginOutcome::Rejected { record, locked } => {
            let event = if locked { audit_events::LOGIN_LOCKED } else { audit_events::LOGIN_FAILED };
            let _ = repo
                .create_security_audit_log(
                    None,
                    event,
                    false,
                    Some(ip),
                    Some(serde_json::json!({
                        "email": &payload.email,
                        "attempts": record.map(|record| record.count),
                    })),
                )
                .await;
            return Err(AppError::InvalidCredentials);
        }
    };

    start_session(&repo, &config.session, cookies, &user, payload.remember).await?;

    let _ = repo
        .create_security_audit_log(Some(&user.id), audit_events::LOGIN_SUCCESS, true, Some(ip), None)
        .await;

    Ok(Json(UserResponse::from(&user)))
}

#[openapi(tag = "Users")]
#[post("/logout")]
pub async fn post_user_logout(pool: &State<PgPool>, current_user: CurrentUser, client_ip: ClientIp, cookies: &CookieJar<'_>) -> Result<Status, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    repo.delete_session(&current_user.session_id, &current_user.id).await?;
    cookies.remove_private(Cookie::build(SESSION_COOKIE).path("/").build());

    let _ = repo
        .create_security_audit_log(Some(&current_user.id), audit_events::LOGOUT, true, client_ip.0, None)
        .await;

    Ok(Status::Ok)
}

#[openapi(tag = "Users")]
#[get("/me")]
pub async fn get_me(pool: &State<PgPool>, _rate_limit: RateLimit, current_user: CurrentUser) -> Result<Json<UserResponse>, AppError> {
    let repo = PostgresRepository { pool: pool.inner().clone() };
    let user = repo.get_user_by_id(&current_user.id).await?.ok_or(AppError::UserNotFound)?;
    Ok(Json(UserResponse::from(&user)))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![post_user, post_user_login, post_user_logout, get_me]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_rocket;
    use rocket::http::ContentType;
    use rocket::local::asynchronous::Client;

    #[test]
    fn remember_me_extends_the_session() {
        let config = SessionConfig::default();
        let now = Utc::now();
        assert_eq!(session_expiry(&config, false, now), now + Duration::hours(24));
        assert_eq!(session_expiry(&config, true, now), now + Duration::days(30));
    }

    #[rocket::async_test]
    async fn me_requires_a_session() {
        let client = Client::tracked(build_rocket(Config::default())).await.expect("valid rocket instance");
        let response = client.get("/api/v1/users/me").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn locked_address_is_rejected_before_credentials_are_checked() {
        let client = Client::tracked(build_rocket(Config::default())).await.expect("valid rocket instance");
        let throttle = client.rocket().state::<LoginThrottle>().expect("throttle managed");

        let key = login_key("10.1.2.3");
        for _ in 0..throttle.max_attempts() {
            throttle.record_failure(&key, throttle.lockout()).await.unwrap();
        }

        let response = client
            .post("/api/v1/users/login")
            .remote("10.1.2.3:4000".parse().unwrap())
            .header(ContentType::JSON)
            .body(r#"{"email":"ada@example.com","password":"Secret123"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::TooManyRequests);
        let retry_after: u64 = response.headers().get_one("Retry-After").unwrap().parse().unwrap();
        assert!((1..=300).contains(&retry_after));
    }

    #[rocket::async_test]
    #[ignore = "requires database"]
    async fn test_login_clears_attempts_on_success() {
        let repo = crate::test_utils::database_repository().await;
        let user = crate::test_utils::database_user(&repo, "free").await;

        let client = Client::tracked(build_rocket(Config::load().unwrap())).await.expect("valid rocket instance");
        let throttle = client.rocket().state::<LoginThrottle>().expect("throttle managed");
        let key = login_key("10.4.5.6");

        let login = |password: &str| {
            client
                .post("/api/v1/users/login")
                .remote("10.4.5.6:4000".parse().unwrap())
                .header(ContentType::JSON)
                .body(serde_json::json!({ "email": &user.email, "password": password }).to_string())
        };

        for _ in 0..2 {
            assert_eq!(login("Wrong123").dispatch().await.status(), Status::Forbidden);
        }
        assert_eq!(throttle.attempts(&key).await.unwrap(), 2);

        let response = login("Secret123").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert!(response.cookies().get_private(SESSION_COOKIE).is_some());
        assert_eq!(throttle.attempts(&key).await.unwrap(), 0);

        crate::test_utils::remove_database_user(&repo, &user.id).await;
    }
}
