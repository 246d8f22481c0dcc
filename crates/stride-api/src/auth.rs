use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use stride_db::Database;
use stride_gateway::dispatcher::Dispatcher;
use stride_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    /// Run a blocking DB call off the async runtime.
    pub async fn run_db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }
}

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;
const MIN_PASSWORD_LEN: usize = 8;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();

    // Validate input
    if !USERNAME_LEN.contains(&username.chars().count()) {
        return Err(ApiError::bad_request("username must be 3-32 characters"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ApiError::bad_request(
            "username may only contain letters, digits, '_', '-' and '.'",
        ));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }

    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(&username)
        .to_string();

    let password = req.password;
    let name = username.clone();
    let profile = state
        .run_db(move |db| {
            // Check if username is taken
            if db.get_user_by_username(&name)?.is_some() {
                return Ok(None);
            }

            // Hash password with Argon2id
            let salt = SaltString::generate(&mut OsRng);
            let password_hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
                .to_string();

            db.create_user(Uuid::new_v4(), &name, &password_hash, &display_name)
                .map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::conflict("username is already taken"))?;

    let token = create_token(&state, profile.id, &profile.username)?;
    info!("Registered {} ({})", profile.username, profile.id);

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user: profile })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let password = req.password;

    let profile = state
        .run_db(move |db| {
            let Some(user) = db.get_user_by_username(&username)? else {
                return Ok(None);
            };

            // Verify password
            let parsed_hash = PasswordHash::new(&user.password)
                .map_err(|e| anyhow::anyhow!("Corrupt password hash for {}: {}", user.id, e))?;
            if Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .is_err()
            {
                return Ok(None);
            }

            user.into_profile().map(Some)
        })
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let token = create_token(&state, profile.id, &profile.username)?;

    Ok(Json(AuthResponse { token, user: profile }))
}

/// The authenticated user's profile, used to restore a session.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let profile = state
        .run_db(move |db| db.get_profile(user_id))
        .await?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(profile))
}

pub fn create_token(state: &AppStateInner, user_id: Uuid, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(state.token_ttl_days)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )
    .map_err(|e| anyhow::anyhow!("Token encoding failed: {}", e))?;

    Ok(token)
}
