//! # Token Manager
//!
//! Owns the per-user OAuth2 credential lifecycle: persistence through the
//! vault, proactive refresh ahead of expiry, revocation, and the
//! `ensure_valid` pre-flight every outbound Google call goes through.
//! Refreshes are single-flight per user; a waiter that finds a fresh
//! credential persisted by the winner returns it without calling upstream.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::crypto::{self, VaultKey};
use crate::error::AppError;
use crate::google::GoogleClient;
use crate::models::user::Model as UserModel;
use crate::repositories::UserRepository;
use crate::retry::{self, RetryPolicy};

/// Tokens are refreshed when expiry falls within this many minutes.
pub const EXPIRY_BUFFER_MINUTES: i64 = 5;

/// Unwrapped credential set.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Per-user OAuth2 credential manager
pub struct TokenManager {
    users: Arc<UserRepository>,
    vault_key: VaultKey,
    google: Arc<GoogleClient>,
    retry_policy: RetryPolicy,
    refresh_flights: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(
        db: Arc<DatabaseConnection>,
        vault_key: VaultKey,
        google: Arc<GoogleClient>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            users: Arc::new(UserRepository::new(db)),
            vault_key,
            google,
            retry_policy,
            refresh_flights: Mutex::new(HashMap::new()),
        }
    }

    /// Wrap and persist a credential set.
    pub async fn store(&self, user_id: Uuid, tokens: &TokenSet) -> Result<(), AppError> {
        let access_ciphertext = crypto::wrap(&self.vault_key, &tokens.access_token)?;
        let refresh_ciphertext = tokens
            .refresh_token
            .as_deref()
            .map(|token| crypto::wrap(&self.vault_key, token))
            .transpose()?;

        self.users
            .store_tokens(
                user_id,
                access_ciphertext,
                refresh_ciphertext,
                tokens.expires_at.map(Into::into),
            )
            .await?;

        Ok(())
    }

    /// Load and unwrap the stored credential set, if any.
    pub async fn load(&self, user_id: Uuid) -> Result<Option<TokenSet>, AppError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))?;

        self.unwrap_tokens(&user)
    }

    fn unwrap_tokens(&self, user: &UserModel) -> Result<Option<TokenSet>, AppError> {
        let Some(access_ciphertext) = user.access_token_ciphertext.as_deref() else {
            return Ok(None);
        };

        let access_token = crypto::unwrap(&self.vault_key, access_ciphertext)?;
        let refresh_token = user
            .refresh_token_ciphertext
            .as_deref()
            .map(|ciphertext| crypto::unwrap(&self.vault_key, ciphertext))
            .transpose()?;

        Ok(Some(TokenSet {
            access_token,
            refresh_token,
            expires_at: user.token_expires_at.map(|at| at.to_utc()),
        }))
    }

    /// Return an access token valid at the instant of return, refreshing
    /// when expiry falls within the 5-minute buffer. The canonical
    /// pre-flight for every upstream call.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn ensure_valid(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<String, AppError> {
        let tokens = self
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::unauthenticated("no stored credentials"))?;

        if token_is_fresh(&tokens) {
            return Ok(tokens.access_token);
        }

        let refreshed = self.refresh(user_id, cancel).await?;
        Ok(refreshed.access_token)
    }

    /// Refresh the user's access token via the upstream refresh grant.
    ///
    /// Single-flight per user: concurrent callers serialize on a per-user
    /// mutex, and any caller that observes a credential refreshed
    /// meanwhile returns it instead of issuing a second upstream call.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn refresh(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<TokenSet, AppError> {
        let flight = {
            let mut flights = self.refresh_flights.lock().await;
            flights.entry(user_id).or_default().clone()
        };

        let result = {
            let _guard = flight.lock().await;
            self.refresh_locked(user_id, cancel).await
        };

        {
            let mut flights = self.refresh_flights.lock().await;
            // Last one out drops the entry (map slot + our clone)
            if let Some(entry) = flights.get(&user_id)
                && Arc::strong_count(entry) <= 2
            {
                flights.remove(&user_id);
            }
        }

        result
    }

    async fn refresh_locked(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<TokenSet, AppError> {
        // Re-read under the flight lock: a concurrent refresh may already
        // have persisted a newer credential, in which case ours would be
        // stale before it started.
        let current = self
            .load(user_id)
            .await?
            .ok_or_else(|| AppError::unauthenticated("no stored credentials"))?;

        if token_is_fresh(&current) {
            return Ok(current);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| AppError::unauthenticated("no refresh token available"))?;

        let google = self.google.clone();
        let response = match retry::execute(
            "oauth.refresh",
            &self.retry_policy,
            cancel,
            None,
            move || {
                let google = google.clone();
                let refresh_token = refresh_token.clone();
                async move { google.refresh_access_token(&refresh_token).await }
            },
        )
        .await
        {
            Ok(response) => response,
            Err(err) => {
                counter!("token_refresh_failure_total").increment(1);
                if err.is_auth() {
                    // The refresh token itself was rejected; nothing we
                    // hold for this user is usable anymore
                    self.users.clear_tokens(user_id).await?;
                    warn!(user_id = %user_id, "refresh token rejected, cleared stored credentials");
                    return Err(AppError::unauthenticated(
                        "refresh token rejected by upstream",
                    ));
                }
                return Err(err.into());
            }
        };

        let expires_at = response
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));
        let tokens = TokenSet {
            access_token: response.access_token,
            // Google only rotates the refresh token on consent; keep the
            // stored one otherwise
            refresh_token: response.refresh_token.or(current.refresh_token),
            expires_at,
        };

        self.store(user_id, &tokens).await?;

        counter!("token_refresh_success_total").increment(1);
        info!(user_id = %user_id, "refreshed access token");

        Ok(tokens)
    }

    /// Drop stored credentials without contacting the upstream. Used when
    /// the upstream keeps rejecting a freshly refreshed token and the
    /// session must be torn down.
    pub async fn clear_credentials(&self, user_id: Uuid) -> Result<(), AppError> {
        self.users.clear_tokens(user_id).await?;
        warn!(user_id = %user_id, "stored credentials cleared");
        Ok(())
    }

    /// Revoke upstream best-effort, then clear stored credentials
    /// unconditionally.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn revoke(&self, user_id: Uuid) -> Result<(), AppError> {
        match self.load(user_id).await {
            Ok(Some(tokens)) => {
                let target = tokens.refresh_token.as_deref().unwrap_or(&tokens.access_token);
                if let Err(err) = self.google.revoke_token(target).await {
                    warn!(user_id = %user_id, error = %err, "upstream revocation failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "could not load tokens for revocation");
            }
        }

        self.users.clear_tokens(user_id).await?;
        info!(user_id = %user_id, "cleared stored credentials");
        Ok(())
    }
}

/// Whether the credential is usable beyond the refresh buffer.
fn token_is_fresh(tokens: &TokenSet) -> bool {
    match tokens.expires_at {
        Some(expires_at) => expires_at > Utc::now() + Duration::minutes(EXPIRY_BUFFER_MINUTES),
        // Unknown expiry is treated as stale so a refresh re-establishes it
        None => false,
    }
}
