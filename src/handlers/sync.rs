//! # Sync Handlers
//!
//! On-demand sync, the two-year backfill, cursor status, and webhook
//! channel lifecycle endpoints.

use axum::{extract::State, response::Json};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::handlers::ApiResponse;
use crate::models::sync_state::SyncStatusResponse;
use crate::server::AppState;
use crate::sync::{SyncOptions, SyncReport};

/// Request body for on-demand sync
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SyncRequest {
    /// Force a full sync regardless of cursor state
    #[serde(default)]
    pub full_sync: bool,
    /// Full-sync window start; defaults to one year ago
    #[serde(default)]
    pub time_min: Option<DateTime<Utc>>,
    /// Full-sync window end; defaults to one year hence
    #[serde(default)]
    pub time_max: Option<DateTime<Utc>>,
}

/// Run a sync for the current user
#[utoipa::path(
    post,
    path = "/api/v1/calendar/sync",
    request_body = SyncRequest,
    responses(
        (status = 200, description = "Sync report", body = ApiResponse<SyncReport>),
        (status = 409, description = "A sync is already running for this user")
    ),
    tag = "sync"
)]
pub async fn run_sync(
    State(state): State<AppState>,
    current_user: CurrentUser,
    body: Option<Json<SyncRequest>>,
) -> Result<Json<ApiResponse<SyncReport>>, AppError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let cancel = CancellationToken::new();

    let report = state
        .sync_engine
        .run_sync(
            current_user.user_id,
            SyncOptions {
                full_sync: request.full_sync,
                time_min: request.time_min,
                time_max: request.time_max,
                max_results: None,
            },
            &cancel,
        )
        .await?;

    Ok(Json(ApiResponse::new(report).with_message("sync completed")))
}

/// Full backfill over a two-year window centered on now
#[utoipa::path(
    post,
    path = "/api/v1/calendar/batch-sync",
    responses(
        (status = 200, description = "Sync report", body = ApiResponse<SyncReport>),
        (status = 409, description = "A sync is already running for this user")
    ),
    tag = "sync"
)]
pub async fn batch_sync(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<ApiResponse<SyncReport>>, AppError> {
    let cancel = CancellationToken::new();
    let now = Utc::now();

    let report = state
        .sync_engine
        .run_sync(
            current_user.user_id,
            SyncOptions {
                full_sync: true,
                time_min: Some(now - Duration::days(365)),
                time_max: Some(now + Duration::days(365)),
                max_results: None,
            },
            &cancel,
        )
        .await?;

    Ok(Json(
        ApiResponse::new(report).with_message("backfill completed"),
    ))
}

/// Current sync cursor state for the user
#[utoipa::path(
    get,
    path = "/api/v1/calendar/sync/status",
    responses((status = 200, description = "Cursor state", body = ApiResponse<SyncStatusResponse>)),
    tag = "sync"
)]
pub async fn sync_status(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<ApiResponse<SyncStatusResponse>>, AppError> {
    let cursor = state.sync_states.ensure(current_user.user_id).await?;
    Ok(Json(ApiResponse::new(SyncStatusResponse::from(cursor))))
}

/// Open a push notification channel for the user's calendar
#[utoipa::path(
    post,
    path = "/api/v1/calendar/watch",
    responses(
        (status = 200, description = "Channel opened"),
        (status = 401, description = "No stored credentials")
    ),
    tag = "sync"
)]
pub async fn watch(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let cancel = CancellationToken::new();
    let subscription = state
        .webhooks
        .subscribe(current_user.user_id, &cancel)
        .await?;

    Ok(Json(ApiResponse::new(serde_json::json!({
        "channel_id": subscription.channel_id,
        "expires_at": subscription.expires_at.map(|at| at.to_rfc3339()),
    }))))
}

/// Tear down the user's push notification channels
#[utoipa::path(
    delete,
    path = "/api/v1/calendar/watch",
    responses((status = 200, description = "Channels deactivated")),
    tag = "sync"
)]
pub async fn unwatch(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let cancel = CancellationToken::new();
    let deactivated = state
        .webhooks
        .unsubscribe(current_user.user_id, &cancel)
        .await?;

    Ok(Json(ApiResponse::new(
        serde_json::json!({ "deactivated": deactivated }),
    )))
}
