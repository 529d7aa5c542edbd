//! # Background Scheduler
//!
//! Periodic sweeper that keeps replicas fresh and state tidy: queues
//! incremental syncs for eligible users, resets abandoned `running` sync
//! rows, garbage-collects expired OAuth states, and replaces lapsed
//! webhook channels.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::repositories::{
    OAuthStateRepository, SyncStateRepository, WebhookSubscriptionRepository,
};
use crate::sync::{SyncEngine, SyncOptions};
use crate::webhooks::WebhookService;

/// Concurrent auto-syncs per tick.
const AUTO_SYNC_CONCURRENCY: usize = 4;

/// Periodic background sweeper
pub struct Scheduler {
    config: Arc<AppConfig>,
    sync_engine: Arc<SyncEngine>,
    webhooks: Arc<WebhookService>,
    sync_states: SyncStateRepository,
    oauth_states: OAuthStateRepository,
    webhook_subscriptions: WebhookSubscriptionRepository,
}

impl Scheduler {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        sync_engine: Arc<SyncEngine>,
        webhooks: Arc<WebhookService>,
    ) -> Self {
        Self {
            config,
            sync_engine,
            webhooks,
            sync_states: SyncStateRepository::new(db.clone()),
            oauth_states: OAuthStateRepository::new(db.clone()),
            webhook_subscriptions: WebhookSubscriptionRepository::new(db),
        }
    }

    /// Run the sweeper loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        info!(
            tick_seconds = self.config.scheduler.tick_seconds,
            "starting background scheduler"
        );
        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let started = std::time::Instant::now();
                    if let Err(err) = self.tick(&shutdown).await {
                        error!(error = %err, "scheduler tick failed");
                    }
                    histogram!("scheduler_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// One sweep: housekeeping first, then auto-sync.
    #[instrument(skip_all)]
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<(), AppError> {
        let now = Utc::now();

        let stale_cutoff = now - Duration::minutes(self.config.scheduler.stale_sync_minutes);
        let reset = self.sync_states.reset_stale(stale_cutoff).await?;
        if reset > 0 {
            warn!(reset, "reset stale running syncs");
            counter!("scheduler_stale_syncs_reset_total").increment(reset);
        }

        let removed_states = self.oauth_states.cleanup_expired().await?;
        if removed_states > 0 {
            debug!(removed_states, "removed expired OAuth states");
        }

        let lapsed_users = self.webhook_subscriptions.deactivate_expired().await?;
        if !lapsed_users.is_empty() {
            info!(
                lapsed_channels = lapsed_users.len(),
                "deactivated expired webhook channels"
            );
            self.resubscribe_lapsed(lapsed_users, shutdown).await;
        }

        self.auto_sync(shutdown).await?;

        Ok(())
    }

    /// Re-establish push channels for users whose channel just lapsed.
    /// Best-effort: a user whose credentials are gone simply stays
    /// unsubscribed until the next authorization.
    async fn resubscribe_lapsed(&self, user_ids: Vec<Uuid>, shutdown: &CancellationToken) {
        for user_id in user_ids {
            let cancel = shutdown.child_token();
            match self.webhooks.subscribe(user_id, &cancel).await {
                Ok(subscription) => {
                    counter!("scheduler_channels_resubscribed_total").increment(1);
                    debug!(
                        user_id = %user_id,
                        channel_id = %subscription.channel_id,
                        "webhook channel re-established"
                    );
                }
                Err(err) => {
                    warn!(
                        user_id = %user_id,
                        error = %err,
                        "could not re-establish webhook channel"
                    );
                }
            }
        }
    }

    /// Queue incremental syncs for users whose replica has aged out.
    /// Eligibility (full sync completed, under the error threshold, not
    /// already running) is enforced by the repository query.
    async fn auto_sync(&self, shutdown: &CancellationToken) -> Result<(), AppError> {
        let synced_before =
            Utc::now() - Duration::minutes(self.config.scheduler.auto_sync_interval_minutes);
        let due = self.sync_states.eligible_for_auto_sync(synced_before).await?;

        if due.is_empty() {
            return Ok(());
        }

        debug!(users = due.len(), "users due for automatic sync");

        let semaphore = Arc::new(tokio::sync::Semaphore::new(AUTO_SYNC_CONCURRENCY));
        let mut handles = Vec::new();

        for cursor in due {
            let semaphore = semaphore.clone();
            let sync_engine = self.sync_engine.clone();
            let cancel = shutdown.child_token();
            let user_id = cursor.user_id;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("scheduler semaphore is never closed");

                match sync_engine
                    .run_sync(user_id, SyncOptions::default(), &cancel)
                    .await
                {
                    Ok(report) => {
                        counter!("scheduler_auto_sync_total", &[("outcome", "success")])
                            .increment(1);
                        debug!(
                            user_id = %user_id,
                            processed = report.processed,
                            "automatic sync completed"
                        );
                    }
                    Err(err) => {
                        counter!("scheduler_auto_sync_total", &[("outcome", "failure")])
                            .increment(1);
                        warn!(user_id = %user_id, error = %err, "automatic sync failed");
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "auto-sync task panicked or was cancelled");
            }
        }

        Ok(())
    }
}
