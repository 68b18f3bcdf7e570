use chrono::{DateTime, Utc};
use regex::Regex;
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::borrow::Cow;
use std::sync::LazyLock;
use uuid::Uuid;
use validator::{Validate, ValidationError};

static LOWERCASE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z]").expect("valid regex"));
static UPPERCASE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Z]").expect("valid regex"));
static DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").expect("valid regex"));

#[derive(Serialize, Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub plan_type: String,
    pub subscription_status: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_subscribed(&self) -> bool {
        self.subscription_status == "active"
    }
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub plan_type: String,
    pub subscription_status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
#[validate(schema(function = "validate_password_confirmation"))]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 8))]
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

/// Requires at least one lowercase letter, one uppercase letter and one digit.
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if LOWERCASE.is_match(password) && UPPERCASE.is_match(password) && DIGIT.is_match(password) {
        return Ok(());
    }
    Err(ValidationError::new("password_complexity").with_message(Cow::Borrowed("password must contain a lowercase letter, an uppercase letter and a digit")))
}

fn validate_password_confirmation(request: &RegisterRequest) -> Result<(), ValidationError> {
    if request.password != request.password_confirmation {
        return Err(ValidationError::new("password_confirmation_mismatch"));
    }
    Ok(())
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            plan_type: user.plan_type.clone(),
            subscription_status: user.subscription_status.clone(),
            created_at: user.created_at,
        }
    }
}
