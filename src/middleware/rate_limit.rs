use std::sync::Arc;
use std::time::Duration;

use crate::auth::{SESSION_COOKIE, parse_session_cookie_value};
use crate::config::RateLimitConfig;
use crate::database::attempt_store::{Admission, AttemptStore};
use rocket::http::{Method, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RateLimitBucket {
    Read,
    Mutation,
}

impl RateLimitBucket {
    fn from_method(method: Method) -> Self {
        match method {
            Method::Post | Method::Put | Method::Patch | Method::Delete => RateLimitBucket::Mutation,
            _ => RateLimitBucket::Read,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            RateLimitBucket::Read => "read",
            RateLimitBucket::Mutation => "mutation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RateLimitIdentity {
    Ip(String),
    User(String),
}

impl RateLimitIdentity {
    fn key(&self, bucket: RateLimitBucket) -> String {
        match self {
            RateLimitIdentity::Ip(ip) => format!("rate-limit:{}:ip:{ip}", bucket.as_str()),
            RateLimitIdentity::User(id) => format!("rate-limit:{}:user:{id}", bucket.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateLimitDecision {
    Allow,
    Limited { retry_after: Duration },
}

/// Fixed-window request counters per identity and bucket, kept in the shared
/// attempt store.
pub(crate) struct RequestLimiter {
    store: Arc<dyn AttemptStore>,
    config: RateLimitConfig,
    window: Duration,
}

impl RequestLimiter {
    pub fn new(store: Arc<dyn AttemptStore>, config: RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_seconds.max(1));
        Self { store, config, window }
    }

    fn limit_for_bucket(&self, bucket: RateLimitBucket) -> u32 {
        match bucket {
            RateLimitBucket::Read => self.config.read_limit,
            RateLimitBucket::Mutation => self.config.mutation_limit,
        }
    }

    /// Nothing is counted for a request that is turned away. Store errors let
    /// the request through.
    async fn check(&self, identities: &[RateLimitIdentity], bucket: RateLimitBucket) -> RateLimitDecision {
        if identities.is_empty() {
            return RateLimitDecision::Allow;
        }

        let keys: Vec<String> = identities.iter().map(|identity| identity.key(bucket)).collect();
        match self.store.increment_all_if_below(&keys, self.limit_for_bucket(bucket), self.window).await {
            Ok(Admission::Admitted) => RateLimitDecision::Allow,
            Ok(Admission::Refused { retry_after }) => RateLimitDecision::Limited { retry_after },
            Err(e) => {
                warn!(keys = ?keys, error = %e, "rate limit store unavailable, allowing request");
                RateLimitDecision::Allow
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimit;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimitRetryAfter(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateLimitError {
    TooManyRequests,
    MissingClientIp,
}

impl RateLimitError {
    fn status(self) -> Status {
        match self {
            RateLimitError::TooManyRequests => Status::TooManyRequests,
            RateLimitError::MissingClientIp => Status::BadRequest,
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RateLimit {
    type Error = RateLimitError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match rate_limit_request(request, RateLimitBucket::from_method(request.method())).await {
            Outcome::Success(_) => Outcome::Success(RateLimit),
            Outcome::Error(error) => Outcome::Error(error),
            Outcome::Forward(status) => Outcome::Forward(status),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for RateLimit {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        responses.responses.insert(
            "429".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Too Many Requests".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}

async fn rate_limit_request(request: &Request<'_>, bucket: RateLimitBucket) -> Outcome<(), RateLimitError> {
    let limiter = match request.rocket().state::<Arc<RequestLimiter>>() {
        Some(limiter) => limiter,
        None => return Outcome::Success(()),
    };

    let request_id = request
        .local_cache(|| None::<crate::middleware::RequestId>)
        .as_ref()
        .map(|r| r.0.as_str())
        .unwrap_or("unknown");

    let mut identities = Vec::new();
    if let Some(ip) = request.client_ip() {
        identities.push(RateLimitIdentity::Ip(ip.to_string()));
    }
    if let Some(user_id) = extract_user_id(request) {
        identities.push(RateLimitIdentity::User(user_id));
    }

    if identities.is_empty() {
        warn!(request_id = %request_id, method = %request.method(), uri = %request.uri(), "client ip unavailable for rate limiting");
        if limiter.config.require_client_ip {
            return Outcome::Error((RateLimitError::MissingClientIp.status(), RateLimitError::MissingClientIp));
        }
        identities.push(RateLimitIdentity::Ip("missing-ip".to_string()));
    }

    match limiter.check(&identities, bucket).await {
        RateLimitDecision::Allow => Outcome::Success(()),
        RateLimitDecision::Limited { retry_after } => {
            let retry_after_secs = retry_after.as_secs().max(1);
            request.local_cache(|| Some(RateLimitRetryAfter(retry_after_secs)));
            warn!(
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                retry_after_secs,
                "rate limit exceeded"
            );
            Outcome::Error((RateLimitError::TooManyRequests.status(), RateLimitError::TooManyRequests))
        }
    }
}

fn extract_user_id(request: &Request<'_>) -> Option<String> {
    let cookie = request.cookies().get_private(SESSION_COOKIE)?;
    let (_, user_id) = parse_session_cookie_value(cookie.value())?;
    Some(user_id.to_string())
}
