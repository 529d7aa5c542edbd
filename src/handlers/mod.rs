//! # HTTP Handlers
//!
//! Axum handlers for the calendar sync API. Every success response is
//! wrapped in the `{success: true, data, message?}` envelope; failures
//! render through [`crate::error::AppError`].

pub mod auth;
pub mod events;
pub mod sync;
pub mod webhook;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::models::ServiceInfo;
use crate::server::AppState;

/// Success envelope wrapping every 2xx payload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Always true
    pub success: bool,
    /// Response payload
    pub data: T,
    /// Optional human-readable note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Pagination block returned alongside event listings
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub has_next: bool,
}

/// Service root
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service information", body = ServiceInfo)),
    tag = "meta"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness/readiness probe backed by a database round-trip
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service healthy"),
        (status = 500, description = "Database unreachable")
    ),
    tag = "meta"
)]
pub async fn healthz(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    crate::db::health_check(&state.db)
        .await
        .map_err(|err| AppError::internal(format!("health check failed: {}", err)))?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}
