//! # Session Authentication
//!
//! Issues and verifies the signed session token carried by the
//! `auth_token` HTTP-only cookie, and provides the [`CurrentUser`]
//! extractor protected endpoints use to resolve the caller.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::COOKIE, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::user::Model as UserModel;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "auth_token";
/// Cookie mirroring the OAuth CSRF state during the authorization flow.
pub const STATE_COOKIE: &str = "oauth_state";

const ISSUER: &str = "calendar-app";
const AUDIENCE: &str = "calendar-users";

/// Claims carried by the session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Issue a session token for a user.
pub fn issue_session_token(config: &AppConfig, user: &UserModel) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = SessionClaims {
        user_id: user.id,
        email: user.email.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::days(config.jwt_ttl_days)).timestamp(),
        iss: ISSUER.to_string(),
        aud: AUDIENCE.to_string(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(format!("failed to sign session token: {}", e)))
}

/// Verify a session token and return its claims.
pub fn verify_session_token(config: &AppConfig, token: &str) -> Result<SessionClaims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.set_audience(&[AUDIENCE]);

    decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::unauthenticated("invalid or expired session"))
}

/// Build the `Set-Cookie` value for a fresh session.
pub fn session_cookie(config: &AppConfig, token: &str) -> String {
    let max_age = Duration::days(config.jwt_ttl_days).num_seconds();
    build_cookie(config, SESSION_COOKIE, token, max_age)
}

/// Build the `Set-Cookie` value that clears the session.
pub fn clear_session_cookie(config: &AppConfig) -> String {
    build_cookie(config, SESSION_COOKIE, "", 0)
}

/// Short-lived cookie mirroring the OAuth state token.
pub fn state_cookie(config: &AppConfig, state: &str) -> String {
    build_cookie(config, STATE_COOKIE, state, 600)
}

/// Clear the OAuth state cookie after callback processing.
pub fn clear_state_cookie(config: &AppConfig) -> String {
    build_cookie(config, STATE_COOKIE, "", 0)
}

fn build_cookie(config: &AppConfig, name: &str, value: &str, max_age: i64) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name, value, max_age
    );
    if config.is_production() {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Extract a cookie value from request headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(COOKIE)?.to_str().ok()?;

    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Authenticated caller resolved from the session cookie.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub email: String,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AppConfig>::from_ref(state);

        let token = cookie_value(&parts.headers, SESSION_COOKIE)
            .ok_or_else(|| AppError::unauthenticated("missing session cookie"))?;

        let claims = verify_session_token(&config, &token)?;

        Ok(CurrentUser {
            user_id: claims.user_id,
            email: claims.email,
        })
    }
}
