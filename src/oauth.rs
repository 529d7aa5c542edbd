//! # OAuth Orchestrator
//!
//! Drives the Google authorization-code flow end to end: CSRF state
//! issuance and one-shot validation, code exchange, profile ingestion,
//! user upsert, and credential storage. Session issuance itself lives in
//! [`crate::auth`]; the handlers glue the two together.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::error::AppError;
use crate::google::GoogleClient;
use crate::models::user::Model as UserModel;
use crate::repositories::{OAuthStateRepository, UserRepository, user::ProfileFields};
use crate::retry::{self, RetryPolicy};
use crate::tokens::{TokenManager, TokenSet};

/// CSRF states expire after this many minutes.
pub const STATE_TTL_MINUTES: i64 = 10;

/// Orchestrates the authorization-code flow
pub struct OAuthOrchestrator {
    google: Arc<GoogleClient>,
    tokens: Arc<TokenManager>,
    states: OAuthStateRepository,
    users: UserRepository,
    retry_policy: RetryPolicy,
}

impl OAuthOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        google: Arc<GoogleClient>,
        tokens: Arc<TokenManager>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            google,
            tokens,
            states: OAuthStateRepository::new(db.clone()),
            users: UserRepository::new(db),
            retry_policy,
        }
    }

    /// Begin the flow: mint a state token, persist it, and build the
    /// upstream authorization URL. The state is also mirrored into a
    /// cookie by the handler.
    #[instrument(skip_all)]
    pub async fn initiate(&self, user_id: Option<Uuid>) -> Result<(Url, String), AppError> {
        let state = generate_state_token();

        self.states
            .create(&state, user_id, STATE_TTL_MINUTES)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, "failed to persist OAuth state");
                AppError::internal("failed to create OAuth state")
            })?;

        let authorize_url = self
            .google
            .build_authorize_url(&state)
            .map_err(|err| AppError::internal(format!("authorize URL: {}", err)))?;

        info!("OAuth flow initiated");
        Ok((authorize_url, state))
    }

    /// Complete the flow at callback time.
    ///
    /// The query state must equal the caller's state cookie AND match an
    /// unexpired persisted row (consumed one-shot). The code is then
    /// exchanged, the profile ingested, and credentials stored.
    #[instrument(skip_all)]
    pub async fn callback(
        &self,
        query_state: &str,
        cookie_state: Option<&str>,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<UserModel, AppError> {
        match cookie_state {
            Some(cookie_state) if cookie_state == query_state => {}
            _ => {
                warn!("OAuth state cookie mismatch");
                return Err(AppError::validation("OAuth state mismatch"));
            }
        }

        let consumed = self.states.consume(query_state).await.map_err(|err| {
            tracing::error!(error = ?err, "failed to look up OAuth state");
            AppError::internal("failed to validate OAuth state")
        })?;

        if consumed.is_none() {
            warn!("OAuth state missing or expired");
            return Err(AppError::validation("invalid or expired OAuth state"));
        }

        let google = self.google.clone();
        let code_owned = code.to_string();
        let token_response = retry::execute(
            "oauth.exchange",
            &self.retry_policy,
            cancel,
            None,
            move || {
                let google = google.clone();
                let code = code_owned.clone();
                async move { google.exchange_code(&code).await }
            },
        )
        .await
        .map_err(|err| {
            warn!(error = %err, "authorization code exchange failed");
            AppError::unauthenticated("authorization code exchange failed")
        })?;

        let userinfo = self
            .google
            .fetch_userinfo(&token_response.access_token)
            .await
            .map_err(|err| {
                warn!(error = %err, "userinfo fetch failed");
                AppError::unauthenticated("could not fetch Google profile")
            })?;

        let user = self
            .users
            .upsert_from_profile(&ProfileFields {
                google_id: userinfo.id,
                email: userinfo.email,
                display_name: userinfo.name,
                picture_url: userinfo.picture,
            })
            .await?;

        let expires_at = token_response
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));
        self.tokens
            .store(
                user.id,
                &TokenSet {
                    access_token: token_response.access_token,
                    refresh_token: token_response.refresh_token,
                    expires_at,
                },
            )
            .await?;

        info!(user_id = %user.id, "OAuth flow completed");
        Ok(user)
    }
}

/// 32 random bytes, base64-url encoded.
fn generate_state_token() -> String {
    use rand::Rng;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}
