//! Authentication: password login, registration and session extraction.
//!
//! Sessions are opaque random tokens; only their SHA-256 hash is stored.
//! A token is accepted from `Authorization: Bearer …` or from the auth
//! cookie, in that order.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::db::{
    create_user, find_user_row_by_email, format_timestamp, load_user, now_timestamp,
    AuthResponse, LoginRequest, RegisterRequest, ResolveDepth, User, UserResponse,
};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_password, validate_person_name};

/// Role given to self-registered accounts
const CUSTOMER_ROLE: &str = "Customer";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token
pub(crate) fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a session for a user and return its token
pub async fn create_session(
    pool: &sqlx::SqlitePool,
    user_id: &str,
    days: i64,
) -> Result<String, sqlx::Error> {
    let token = generate_token();
    let expires_at = format_timestamp(chrono::Utc::now() + chrono::Duration::days(days));

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(now_timestamp())
    .execute(pool)
    .await?;

    Ok(token)
}

fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(config.session_days))
        .build()
}

fn removal_cookie(config: &AuthConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), "")).path("/").build()
}

/// Extract the session token from request headers
fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve a session token to its user, with roles and permissions populated
pub async fn get_current_user(pool: &sqlx::SqlitePool, token: &str) -> Result<Option<User>, sqlx::Error> {
    let user_id: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(hash_token(token))
            .bind(now_timestamp())
            .fetch_optional(pool)
            .await?;

    match user_id {
        Some((user_id,)) => load_user(pool, &user_id, ResolveDepth::Permissions).await,
        None => Ok(None),
    }
}

/// The authenticated caller; rejects with 401 when absent
pub struct CurrentUser(pub User);

/// The caller if authenticated
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = extract_token(&parts.headers, &state.config.auth.cookie_name) else {
            return Ok(MaybeUser(None));
        };
        Ok(MaybeUser(get_current_user(&state.db, &token).await?))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let MaybeUser(user) = MaybeUser::from_request_parts(parts, state).await?;
        user.map(CurrentUser)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let row = find_user_row_by_email(&state.db, request.email.trim()).await?;

    let row = match row {
        Some(row) if verify_password(&request.password, &row.password_hash) => row,
        _ => {
            tracing::warn!(email = %request.email, "Failed login attempt");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    let user = load_user(&state.db, &row.id, ResolveDepth::Roles)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    let token = create_session(&state.db, &user.id, state.config.auth.session_days).await?;

    tracing::info!(user_id = %user.id, "User logged in");
    Ok((
        jar.add(session_cookie(&state.config.auth, token.clone())),
        Json(AuthResponse {
            token,
            user: UserResponse::from(&user),
        }),
    ))
}

/// Register a customer account and log it in
pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    let email = request.email.trim().to_lowercase();

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_email(&email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    if let Err(e) = validate_person_name(&request.name) {
        errors.add("name", e);
    }
    errors.finish()?;

    if find_user_row_by_email(&state.db, &email).await?.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password(&request.password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to hash password")
    })?;

    let user_id = create_user(
        &state.db,
        &email,
        &password_hash,
        request.name.trim(),
        &[CUSTOMER_ROLE],
    )
    .await?;
    let user = load_user(&state.db, &user_id, ResolveDepth::Roles)
        .await?
        .ok_or_else(|| ApiError::internal("Registered user disappeared"))?;
    let token = create_session(&state.db, &user.id, state.config.auth.session_days).await?;

    tracing::info!(user_id = %user.id, "User registered");
    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(&state.config.auth, token.clone())),
        Json(AuthResponse {
            token,
            user: UserResponse::from(&user),
        }),
    ))
}

/// Delete the caller's session, if any, and clear the cookie
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    if let Some(token) = extract_token(&headers, &state.config.auth.cookie_name) {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(hash_token(&token))
            .execute(&state.db)
            .await?;
    }

    Ok((
        jar.remove(removal_cookie(&state.config.auth)),
        StatusCode::NO_CONTENT,
    ))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct horse 1").unwrap();
        assert!(verify_password("correct horse 1", &hash));
        assert!(!verify_password("wrong horse 1", &hash));
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn test_tokens_are_random_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn test_extract_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("Cookie", "auth_token=from-cookie".parse().unwrap());
        assert_eq!(extract_token(&headers, "auth_token").as_deref(), Some("from-cookie"));

        headers.insert("Authorization", "Bearer from-header".parse().unwrap());
        assert_eq!(extract_token(&headers, "auth_token").as_deref(), Some("from-header"));

        assert_eq!(extract_token(&HeaderMap::new(), "auth_token"), None);
    }

    #[tokio::test]
    async fn test_sessions_resolve_and_expire() {
        let pool = crate::db::init_memory().await.unwrap();
        let user_id = create_user(&pool, "ada@example.com", "hash", "Ada", &["Staff"])
            .await
            .unwrap();

        let token = create_session(&pool, &user_id, 7).await.unwrap();
        let user = get_current_user(&pool, &token).await.unwrap().unwrap();
        assert_eq!(user.id, user_id);
        // Permissions are populated so access checks work
        assert!(crate::access::has_permission(Some(&user), "read", "orders"));

        assert!(get_current_user(&pool, "bogus").await.unwrap().is_none());

        let expired = create_session(&pool, &user_id, -1).await.unwrap();
        assert!(get_current_user(&pool, &expired).await.unwrap().is_none());
    }
}
