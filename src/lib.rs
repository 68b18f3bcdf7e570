mod auth;
mod config;
mod database;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod service;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;

use crate::config::{StoreBackend, StoreConfig};
use crate::database::attempt_store::{AttemptStore, MemoryAttemptStore, RedisAttemptStore};
use crate::db::stage_db;
use crate::middleware::RequestLogger;
use crate::middleware::rate_limit::RequestLimiter;
use crate::routes as app_routes;
use crate::service::login_throttle::LoginThrottle;
use crate::service::user_locks::UserLocks;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG takes precedence over the configured level, e.g.
    //   RUST_LOG=bettersync::service=debug,info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    // A subscriber may already be installed (tests build several rockets).
    let _ = if json_format { subscriber.json().try_init() } else { subscriber.try_init() };
}

fn build_cors(cors_config: &config::CorsConfig) -> Result<CorsOptions, String> {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    if is_wildcard && cors_config.allow_credentials {
        return Err("Cannot use wildcard origins (*) with credentials enabled. Either set specific origins or disable credentials.".to_string());
    }

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    Ok(CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Delete, Method::Options, Method::Head]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Accept", "X-Request-Id"]),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    })
}

/// Attaches CORS, or a fairing that aborts ignition if the configuration is unusable.
fn stage_cors(cors_config: &config::CorsConfig) -> AdHoc {
    let cors = build_cors(cors_config).and_then(|options| options.to_cors().map_err(|e| e.to_string()));
    AdHoc::try_on_ignite("CORS", |rocket| async move {
        match cors {
            Ok(cors) => Ok(rocket.attach(cors)),
            Err(e) => {
                error!("Invalid CORS configuration: {}", e);
                Err(rocket)
            }
        }
    })
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

fn collect_route_specs() -> Vec<RouteSpec> {
    let (user_routes, user_openapi) = app_routes::user::routes();
    let (sync_routes, sync_openapi) = app_routes::sync::routes();
    let (dashboard_routes, dashboard_openapi) = app_routes::dashboard::routes();
    let (health_routes, health_openapi) = app_routes::health::routes();

    vec![
        RouteSpec {
            path: "/users",
            routes: user_routes,
            openapi: user_openapi,
        },
        RouteSpec {
            path: "/syncs",
            routes: sync_routes,
            openapi: sync_openapi,
        },
        RouteSpec {
            path: "/dashboard",
            routes: dashboard_routes,
            openapi: dashboard_openapi,
        },
        RouteSpec {
            path: "/health",
            routes: health_routes,
            openapi: health_openapi,
        },
    ]
}

fn mount_api_routes(mut rocket: Rocket<Build>, base_path: &str, enable_swagger: bool) -> Rocket<Build> {
    let mut openapi_list = Vec::new();
    for spec in collect_route_specs() {
        rocket = rocket.mount(join_base_path(base_path, spec.path), spec.routes);
        openapi_list.push((spec.path, spec.openapi));
    }

    if !enable_swagger {
        return rocket;
    }

    let openapi_docs = match marge_spec_list(&openapi_list) {
        Ok(docs) => docs,
        Err(err) => {
            error!("Could not merge OpenAPI spec, docs disabled: {}", err);
            return rocket;
        }
    };

    let settings = rocket_okapi::settings::OpenApiSettings::default();
    rocket = rocket.mount(base_path, vec![get_openapi_route(openapi_docs, &settings)]);

    let openapi_url = join_base_path(base_path, "openapi.json");
    rocket.mount(
        join_base_path(base_path, "docs"),
        make_swagger_ui(&SwaggerUIConfig {
            url: openapi_url,
            ..Default::default()
        }),
    )
}

async fn init_attempt_store(store_config: &StoreConfig) -> Result<Arc<dyn AttemptStore>, String> {
    match store_config.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryAttemptStore::new());
            Arc::clone(&store).spawn_cleanup_task(Duration::from_secs(store_config.cleanup_interval_seconds));
            Ok(store)
        }
        StoreBackend::Redis => {
            let store = RedisAttemptStore::connect(&store_config.redis_url).await.map_err(|e| e.to_string())?;
            Ok(Arc::new(store))
        }
    }
}

/// Shared attempt store plus everything built on it: the login throttle and
/// the request rate limiter.
fn stage_attempt_store(config: &Config) -> AdHoc {
    let store_config = config.store.clone();
    let throttle_config = config.login_throttle.clone();
    let rate_limit_config = config.rate_limit.clone();

    AdHoc::try_on_ignite("Attempt Store", |rocket| async move {
        match init_attempt_store(&store_config).await {
            Ok(store) => {
                info!(backend = ?store_config.backend, "attempt store initialized");
                let throttle = LoginThrottle::new(Arc::clone(&store), &throttle_config);
                let limiter = Arc::new(RequestLimiter::new(store, rate_limit_config));
                Ok(rocket.manage(throttle).manage(limiter))
            }
            Err(e) => {
                error!(backend = ?store_config.backend, "Failed to initialize attempt store: {}", e);
                Err(rocket)
            }
        }
    })
}

pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);

    let figment = rocket::Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.address.clone()));

    let base_path = normalize_base_path(&config.api.base_path);

    let rocket = rocket::custom(figment)
        .attach(stage_cors(&config.cors))
        .attach(RequestLogger)
        .attach(stage_db(config.database.clone()))
        .attach(stage_attempt_store(&config))
        .manage(UserLocks::new());

    let rocket = mount_api_routes(rocket, &base_path, config.api.enable_swagger).register(
        base_path.as_str(),
        catchers![
            app_routes::error::bad_request,
            app_routes::error::unauthorized,
            app_routes::error::forbidden,
            app_routes::error::not_found,
            app_routes::error::conflict,
            app_routes::error::unprocessable_entity,
            app_routes::error::too_many_requests,
            app_routes::error::service_unavailable,
        ],
    );

    rocket.manage(config)
}
