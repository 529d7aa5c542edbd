//! # Webhook Demultiplexer
//!
//! Resolves inbound Google channel notifications to their owning user by
//! `(channel token, resource id)` and triggers a targeted incremental
//! sync. Also owns the symmetric subscribe/unsubscribe flows that create
//! and tear down the push channels those notifications arrive on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::google::GoogleClient;
use crate::google::types::{ChannelStopRequest, WatchRequest};
use crate::models::webhook_subscription::Model as SubscriptionModel;
use crate::repositories::{
    WebhookSubscriptionRepository, webhook_subscription::NewSubscription,
};
use crate::retry::{self, RetryPolicy};
use crate::sync::{SyncEngine, SyncOptions};
use crate::tokens::TokenManager;

/// Page cap for webhook-triggered incremental syncs.
const WEBHOOK_SYNC_MAX_RESULTS: u32 = 100;

/// Parsed `X-Goog-*` notification headers.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub resource_state: String,
    pub resource_id: String,
    pub resource_uri: Option<String>,
    pub channel_id: String,
    pub channel_token: String,
}

/// Webhook subscription lifecycle and notification demultiplexing
pub struct WebhookService {
    subscriptions: WebhookSubscriptionRepository,
    tokens: Arc<TokenManager>,
    google: Arc<GoogleClient>,
    sync_engine: Arc<SyncEngine>,
    retry_policy: RetryPolicy,
    /// Public base URL notifications are delivered to
    callback_base_url: String,
}

impl WebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        tokens: Arc<TokenManager>,
        google: Arc<GoogleClient>,
        sync_engine: Arc<SyncEngine>,
        retry_policy: RetryPolicy,
        callback_base_url: String,
    ) -> Self {
        Self {
            subscriptions: WebhookSubscriptionRepository::new(db),
            tokens,
            google,
            sync_engine,
            retry_policy,
            callback_base_url,
        }
    }

    /// Process an inbound notification. Errors are absorbed by the
    /// handler (the upstream retries on non-2xx); this returns whether a
    /// sync was triggered, for logging and tests.
    #[instrument(skip_all, fields(resource_state = %notification.resource_state))]
    pub async fn handle_notification(
        &self,
        notification: &Notification,
    ) -> Result<bool, AppError> {
        counter!("webhook_notifications_total").increment(1);

        let Some(subscription) = self.resolve_subscription(notification).await? else {
            warn!(
                channel_id = %notification.channel_id,
                "notification does not match any active subscription"
            );
            counter!("webhook_unresolved_total").increment(1);
            return Ok(false);
        };

        match notification.resource_state.as_str() {
            "sync" | "exists" => {
                let sync_engine = self.sync_engine.clone();
                let user_id = subscription.user_id;

                // The upstream expects a prompt 200; run the sync out of
                // band and absorb its outcome here.
                tokio::spawn(async move {
                    let cancel = CancellationToken::new();
                    let options = SyncOptions {
                        max_results: Some(WEBHOOK_SYNC_MAX_RESULTS),
                        ..Default::default()
                    };

                    match sync_engine.run_sync(user_id, options, &cancel).await {
                        Ok(report) => info!(
                            user_id = %user_id,
                            processed = report.processed,
                            "webhook-triggered sync completed"
                        ),
                        Err(err) => warn!(
                            user_id = %user_id,
                            error = %err,
                            "webhook-triggered sync failed"
                        ),
                    }
                });

                Ok(true)
            }
            other => {
                info!(resource_state = other, "ignoring notification state");
                Ok(false)
            }
        }
    }

    /// Resolve `(channel token, resource id)` against active
    /// subscriptions. Token comparison is constant-time.
    async fn resolve_subscription(
        &self,
        notification: &Notification,
    ) -> Result<Option<SubscriptionModel>, AppError> {
        let candidates = self
            .subscriptions
            .find_active_by_resource(&notification.resource_id)
            .await?;

        Ok(candidates.into_iter().find(|candidate| {
            bool::from(ConstantTimeEq::ct_eq(
                candidate.token.as_bytes(),
                notification.channel_token.as_bytes(),
            ))
        }))
    }

    /// Open a push channel for the user's primary calendar, replacing any
    /// previous channels.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn subscribe(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<SubscriptionModel, AppError> {
        let access_token = self.tokens.ensure_valid(user_id, cancel).await?;

        let watch = WatchRequest {
            id: Uuid::new_v4().to_string(),
            channel_type: "web_hook".to_string(),
            address: format!("{}/api/v1/calendar/webhook", self.callback_base_url),
            token: generate_channel_token(),
        };

        let google = self.google.clone();
        let watch_for_call = watch.clone();
        let channel = retry::execute(
            "calendar.events.watch",
            &self.retry_policy,
            cancel,
            None,
            move || {
                let google = google.clone();
                let access_token = access_token.clone();
                let watch = watch_for_call.clone();
                async move { google.watch_events(&access_token, &watch).await }
            },
        )
        .await
        .map_err(AppError::from)?;

        // Superseded channels stop receiving traffic we care about
        self.teardown_channels(user_id, cancel).await?;

        let expires_at = channel
            .expiration
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let subscription = self
            .subscriptions
            .create(NewSubscription {
                user_id,
                channel_id: channel.id,
                resource_id: channel.resource_id,
                token: watch.token,
                resource_uri: channel.resource_uri,
                expires_at,
            })
            .await?;

        counter!("webhook_subscriptions_created_total").increment(1);
        info!(channel_id = %subscription.channel_id, "webhook channel opened");
        Ok(subscription)
    }

    /// Stop the user's channels upstream (best-effort) and deactivate the
    /// local rows unconditionally.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn unsubscribe(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<u64, AppError> {
        self.teardown_channels(user_id, cancel).await
    }

    async fn teardown_channels(
        &self,
        user_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<u64, AppError> {
        let active = self.subscriptions.find_active_by_user(user_id).await?;
        if active.is_empty() {
            return Ok(0);
        }

        match self.tokens.ensure_valid(user_id, cancel).await {
            Ok(access_token) => {
                for subscription in &active {
                    let stop = ChannelStopRequest {
                        id: subscription.channel_id.clone(),
                        resource_id: subscription.resource_id.clone(),
                    };
                    if let Err(err) = self.google.stop_channel(&access_token, &stop).await {
                        warn!(
                            channel_id = %subscription.channel_id,
                            error = %err,
                            "failed to stop channel upstream"
                        );
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "no usable token, skipping upstream channel stop");
            }
        }

        let deactivated = self.subscriptions.deactivate_for_user(user_id).await?;
        info!(deactivated, "webhook channels deactivated");
        Ok(deactivated)
    }
}

/// 32 random bytes, base64-url encoded.
fn generate_channel_token() -> String {
    use rand::Rng;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}
