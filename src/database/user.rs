use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::plan::PlanType;
use crate::models::user::User;
use argon2::Argon2;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use std::sync::LazyLock;
use uuid::Uuid;

/// A real Argon2 hash generated once, used as a timing decoy so that login
/// requests for unknown emails cost the same as requests for real accounts.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"dummy-never-matches", &salt)
        .ok()
        .map(|hash| hash.to_string())
});

const USER_COLUMNS: &str = "id, name, email, password_hash, plan_type, subscription_status, created_at";

impl PostgresRepository {
    /// New accounts always start on the free plan.
    pub async fn create_user(&self, name: &str, email: &str, password: &str) -> Result<User, AppError> {
        let password_hash = password_hash(password)?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, plan_type, subscription_status)
            VALUES ($1, $2, $3, $4, 'free')
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(name)
        .bind(email)
        .bind(&password_hash)
        .bind(PlanType::Free.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db_error| db_error.is_unique_violation()) {
                AppError::UserAlreadyExists(email.to_string())
            } else {
                AppError::from(e)
            }
        })?;

        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: &Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn verify_password(&self, user: &User, password: &str) -> Result<(), AppError> {
        verify_password_hash(&user.password_hash, password)
    }

    /// Perform a throwaway Argon2 verification so that response timing does
    /// not reveal whether an email is registered.
    pub fn dummy_verify(password: &str) {
        if let Some(hash) = DUMMY_HASH.as_deref() {
            let _ = verify_password_hash(hash, password);
        }
    }
}

fn verify_password_hash(stored: &str, password: &str) -> Result<(), AppError> {
    let password_hash = PasswordHash::new(stored).map_err(|e| AppError::password_hash("Failed to parse stored password hash", e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &password_hash)
        .map_err(|_| AppError::InvalidCredentials)
}

pub(crate) fn password_hash(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}
