//! # Auth Handlers
//!
//! The Google authorization-code flow endpoints plus session management:
//! initiate, callback, forced refresh, logout, and profile/status reads.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use utoipa::ToSchema;

use crate::auth::{self, CurrentUser};
use crate::error::AppError;
use crate::handlers::ApiResponse;
use crate::models::UserProfile;
use crate::server::AppState;

/// Query parameters Google sends to the OAuth callback
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Response body for `/auth/status`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

/// Begin the Google authorization-code flow
#[utoipa::path(
    get,
    path = "/api/v1/auth/google",
    responses((status = 307, description = "Redirect to the Google consent screen")),
    tag = "auth"
)]
pub async fn google_login(State(state): State<AppState>) -> Result<Response, AppError> {
    let (authorize_url, oauth_state) = state.oauth.initiate(None).await?;

    let cookie = auth::state_cookie(&state.config, &oauth_state);
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Redirect::temporary(authorize_url.as_str()),
    )
        .into_response())
}

/// Consume the authorization code and establish a session
#[utoipa::path(
    get,
    path = "/api/v1/auth/google/callback",
    responses(
        (status = 307, description = "Redirect to the frontend with a session cookie"),
        (status = 400, description = "State mismatch or missing code"),
        (status = 401, description = "Code exchange rejected by Google")
    ),
    tag = "auth"
)]
pub async fn google_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    if let Some(error) = query.error {
        warn!(error = %error, "authorization denied at consent screen");
        return Err(AppError::unauthenticated(format!(
            "authorization denied: {}",
            error
        )));
    }

    let code = query
        .code
        .ok_or_else(|| AppError::validation("missing authorization code"))?;
    let query_state = query
        .state
        .ok_or_else(|| AppError::validation("missing state parameter"))?;
    let cookie_state = auth::cookie_value(&headers, auth::STATE_COOKIE);

    let cancel = CancellationToken::new();
    let user = state
        .oauth
        .callback(&query_state, cookie_state.as_deref(), &code, &cancel)
        .await?;

    let token = auth::issue_session_token(&state.config, &user)?;
    let session_cookie = auth::session_cookie(&state.config, &token);
    let clear_state = auth::clear_state_cookie(&state.config);

    let success_url = format!("{}/auth/success", state.config.frontend_url);
    Ok((
        AppendHeaders([(SET_COOKIE, session_cookie), (SET_COOKIE, clear_state)]),
        Redirect::temporary(&success_url),
    )
        .into_response())
}

/// Force a token refresh and rotate the session cookie
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    responses(
        (status = 200, description = "Tokens refreshed"),
        (status = 401, description = "No session or refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Response, AppError> {
    let cancel = CancellationToken::new();
    state.tokens.refresh(current_user.user_id, &cancel).await?;

    let user = state
        .users
        .find_by_id(current_user.user_id)
        .await?
        .ok_or_else(|| AppError::unauthenticated("user no longer exists"))?;

    let token = auth::issue_session_token(&state.config, &user)?;
    let cookie = auth::session_cookie(&state.config, &token);

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        axum::Json(ApiResponse::new(serde_json::json!({ "refreshed": true }))),
    )
        .into_response())
}

/// Revoke upstream tokens and clear the session
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses((status = 200, description = "Session terminated")),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Response, AppError> {
    let cancel = CancellationToken::new();

    // Push channels die with the credentials that created them
    if let Err(err) = state
        .webhooks
        .unsubscribe(current_user.user_id, &cancel)
        .await
    {
        warn!(error = %err, "webhook teardown during logout failed");
    }

    state.tokens.revoke(current_user.user_id).await?;

    let cookie = auth::clear_session_cookie(&state.config);
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        axum::Json(ApiResponse::new(serde_json::json!({ "logged_out": true }))),
    )
        .into_response())
}

/// Current user profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Profile", body = ApiResponse<UserProfile>),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
pub async fn me(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<axum::Json<ApiResponse<UserProfile>>, AppError> {
    let user = state
        .users
        .find_by_id(current_user.user_id)
        .await?
        .ok_or_else(|| AppError::unauthenticated("user no longer exists"))?;

    Ok(axum::Json(ApiResponse::new(UserProfile::from(user))))
}

/// Session status; never fails, reports `authenticated: false` instead
#[utoipa::path(
    get,
    path = "/api/v1/auth/status",
    responses((status = 200, description = "Session status", body = ApiResponse<AuthStatus>)),
    tag = "auth"
)]
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, axum::Json<ApiResponse<AuthStatus>>), AppError> {
    let claims = auth::cookie_value(&headers, auth::SESSION_COOKIE)
        .and_then(|token| auth::verify_session_token(&state.config, &token).ok());

    let status = match claims {
        Some(claims) => {
            let user = state.users.find_by_id(claims.user_id).await?;
            AuthStatus {
                authenticated: user.is_some(),
                user: user.map(UserProfile::from),
            }
        }
        None => AuthStatus {
            authenticated: false,
            user: None,
        },
    };

    Ok((StatusCode::OK, axum::Json(ApiResponse::new(status))))
}
