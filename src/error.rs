//! # Error Handling
//!
//! This module provides unified error handling for the calendar sync API,
//! rendering every failure as the service's JSON error envelope:
//! `{ "success": false, "error": { type, title, status, detail, instance } }`.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::crypto::VaultError;

/// Caller-visible error kinds, distinct from HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    ForbiddenResource,
    NotFound,
    Conflict,
    SyncAlreadyRunning,
    UpstreamRateLimited,
    UpstreamQuotaExceeded,
    UpstreamAuth,
    UpstreamNetwork,
    Internal,
}

impl ErrorKind {
    /// Stable identifier used as the envelope's `type` member.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::ForbiddenResource => "forbidden-resource",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::SyncAlreadyRunning => "sync-already-running",
            ErrorKind::UpstreamRateLimited => "upstream-rate-limited",
            ErrorKind::UpstreamQuotaExceeded => "upstream-quota-exceeded",
            ErrorKind::UpstreamAuth => "upstream-auth",
            ErrorKind::UpstreamNetwork => "upstream-network",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status the kind surfaces as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            // Opaque: existence of another user's row is not revealed
            ErrorKind::ForbiddenResource => StatusCode::NOT_FOUND,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::SyncAlreadyRunning => StatusCode::CONFLICT,
            ErrorKind::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamQuotaExceeded => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::UpstreamAuth => StatusCode::UNAUTHORIZED,
            ErrorKind::UpstreamNetwork => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation failed",
            ErrorKind::Unauthenticated => "Authentication required",
            ErrorKind::ForbiddenResource => "Resource not found",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::SyncAlreadyRunning => "Sync already running",
            ErrorKind::UpstreamRateLimited => "Upstream rate limit exceeded",
            ErrorKind::UpstreamQuotaExceeded => "Upstream quota exceeded",
            ErrorKind::UpstreamAuth => "Upstream authorization failed",
            ErrorKind::UpstreamNetwork => "Upstream unavailable",
            ErrorKind::Internal => "Internal server error",
        }
    }
}

/// Unified API error carried through handlers and services.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {detail}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub detail: String,
    /// Request path, when known at render time
    pub instance: Option<String>,
    /// Suggested retry delay in seconds, for rate-limit responses
    pub retry_after: Option<u64>,
}

impl AppError {
    pub fn new<S: Into<String>>(kind: ErrorKind, detail: S) -> Self {
        Self {
            kind,
            detail: detail.into(),
            instance: None,
            retry_after: None,
        }
    }

    pub fn validation<S: Into<String>>(detail: S) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    pub fn unauthenticated<S: Into<String>>(detail: S) -> Self {
        Self::new(ErrorKind::Unauthenticated, detail)
    }

    pub fn forbidden<S: Into<String>>(detail: S) -> Self {
        Self::new(ErrorKind::ForbiddenResource, detail)
    }

    pub fn not_found<S: Into<String>>(detail: S) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    pub fn conflict<S: Into<String>>(detail: S) -> Self {
        Self::new(ErrorKind::Conflict, detail)
    }

    pub fn internal<S: Into<String>>(detail: S) -> Self {
        Self::new(ErrorKind::Internal, detail)
    }

    pub fn sync_already_running() -> Self {
        Self::new(
            ErrorKind::SyncAlreadyRunning,
            "a sync is already running for this user",
        )
    }

    pub fn with_instance<S: Into<String>>(mut self, instance: S) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status_code()
    }
}

/// Problem body nested inside the error envelope
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProblemBody {
    /// Stable error kind identifier
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable summary
    pub title: String,
    /// HTTP status code
    pub status: u16,
    /// Occurrence-specific detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Request path that produced the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// The error envelope returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorEnvelope {
    /// Always false
    pub success: bool,
    /// Problem details
    pub error: ProblemBody,
}

impl From<&AppError> for ErrorEnvelope {
    fn from(err: &AppError) -> Self {
        let status = err.status();
        ErrorEnvelope {
            success: false,
            error: ProblemBody {
                kind: err.kind.as_str().to_string(),
                title: err.kind.title().to_string(),
                status: status.as_u16(),
                detail: if err.detail.is_empty() {
                    None
                } else {
                    Some(err.detail.clone())
                },
                instance: err.instance.clone(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = ErrorEnvelope::from(&self);

        let mut headers = HeaderMap::new();
        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        // A recurring upstream auth failure ends the session: the stored
        // credentials were already cleared, so the cookie goes with them
        if self.kind == ErrorKind::UpstreamAuth
            && let Ok(header_value) = HeaderValue::from_str(&format!(
                "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
                crate::auth::SESSION_COOKIE
            ))
        {
            headers.insert("set-cookie", header_value);
        }

        (status, headers, axum::Json(envelope)).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        match &err {
            sea_orm::DbErr::RecordNotFound(what) => AppError::not_found(what.clone()),
            _ => {
                tracing::error!(error = ?err, "database error");
                AppError::internal("database operation failed")
            }
        }
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        // Never include ciphertext or plaintext fragments in the response
        tracing::error!(error = %err, "credential vault failure");
        AppError::internal("credential processing failed")
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        AppError::validation(err.body_text())
    }
}
