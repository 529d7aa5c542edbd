//! # Sync Engine
//!
//! Reconciles the upstream Google Calendar into the local replica. Runs
//! either a full sync (pagination over a time window) or an incremental
//! sync (pagination from the stored sync token), degrading transparently
//! to full sync when the upstream invalidates the cursor. The per-user
//! `sync_in_progress` flag provides mutual exclusion; per-item failures
//! are collected rather than aborting the run.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, ErrorKind};
use crate::google::types::{EventsListResponse, UpstreamChange, map_event};
use crate::google::{GoogleClient, ListEventsQuery, MAX_RESULTS_CAP};
use crate::repositories::{EventRepository, SyncStateRepository, UpsertOutcome};
use crate::retry::{self, RetryPolicy, UpstreamError};
use crate::tokens::TokenManager;

/// Default reach of a full sync around now.
const FULL_SYNC_WINDOW_DAYS: i64 = 365;

/// Options for one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Force full sync regardless of cursor state
    pub full_sync: bool,
    /// Window start for full sync; defaults to one year ago
    pub time_min: Option<DateTime<Utc>>,
    /// Window end for full sync; defaults to one year hence
    pub time_max: Option<DateTime<Utc>>,
    /// Page size cap; defaults to the API maximum
    pub max_results: Option<u32>,
}

/// One per-item failure collected during a run.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncItemError {
    /// Classified error kind
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

/// Outcome of a sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    pub success: bool,
    /// Upstream items examined
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Per-item failures; the run continues past them
    pub errors: Vec<SyncItemError>,
}

/// Reconciles upstream calendar state into the local replica
pub struct SyncEngine {
    db: Arc<DatabaseConnection>,
    events: EventRepository,
    sync_states: SyncStateRepository,
    tokens: Arc<TokenManager>,
    google: Arc<GoogleClient>,
    retry_policy: RetryPolicy,
}

impl SyncEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        tokens: Arc<TokenManager>,
        google: Arc<GoogleClient>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            events: EventRepository::new(db.clone()),
            sync_states: SyncStateRepository::new(db.clone()),
            db,
            tokens,
            google,
            retry_policy,
        }
    }

    /// Run one sync for the user, honoring the single-run-per-user rule.
    #[instrument(skip_all, fields(user_id = %user_id, full_sync = options.full_sync))]
    pub async fn run_sync(
        &self,
        user_id: Uuid,
        options: SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, AppError> {
        if !self.sync_states.try_begin_sync(user_id).await? {
            counter!("sync_rejected_already_running_total").increment(1);
            return Err(AppError::sync_already_running());
        }

        let started = std::time::Instant::now();
        let result = self.run_locked(user_id, &options, cancel).await;
        histogram!("sync_run_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok((mut report, next_sync_token)) => {
                self.sync_states
                    .complete_sync(user_id, next_sync_token)
                    .await?;
                report.success = true;

                counter!("sync_runs_total", &[("outcome", "success")]).increment(1);
                info!(
                    processed = report.processed,
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    item_errors = report.errors.len(),
                    "sync completed"
                );
                Ok(report)
            }
            Err(err) => {
                counter!("sync_runs_total", &[("outcome", "failure")]).increment(1);
                warn!(error = %err, "sync failed");
                self.sync_states.fail_sync(user_id, &err.detail).await?;
                Err(err)
            }
        }
    }

    /// The body of a sync run; the caller holds the `sync_in_progress`
    /// flag for the entire duration, including an incremental→full
    /// fallback.
    async fn run_locked(
        &self,
        user_id: Uuid,
        options: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<(SyncReport, Option<String>), AppError> {
        let mut access_token = self.tokens.ensure_valid(user_id, cancel).await?;
        let cursor = self.sync_states.ensure(user_id).await?;

        let sync_token = match cursor.next_sync_token {
            Some(ref token) if !options.full_sync && cursor.full_sync_completed => token.clone(),
            _ => {
                return self
                    .full_sync(user_id, options, &mut access_token, cancel)
                    .await;
            }
        };

        match self
            .incremental_sync(user_id, options, &sync_token, &mut access_token, cancel)
            .await
        {
            Err(err) if err.kind == ErrorKind::NotFound => {
                // The upstream invalidated the cursor (410); degrade to a
                // fresh full sync with the same options.
                warn!(user_id = %user_id, "sync token invalidated, falling back to full sync");
                counter!("sync_token_invalidated_total").increment(1);
                self.sync_states.clear_sync_token(user_id).await?;
                self.full_sync(user_id, options, &mut access_token, cancel)
                    .await
            }
            other => other,
        }
    }

    async fn full_sync(
        &self,
        user_id: Uuid,
        options: &SyncOptions,
        access_token: &mut String,
        cancel: &CancellationToken,
    ) -> Result<(SyncReport, Option<String>), AppError> {
        let now = Utc::now();
        let time_min = options
            .time_min
            .unwrap_or_else(|| now - Duration::days(FULL_SYNC_WINDOW_DAYS));
        let time_max = options
            .time_max
            .unwrap_or_else(|| now + Duration::days(FULL_SYNC_WINDOW_DAYS));

        let mut report = SyncReport::default();
        let mut next_sync_token = None;
        let mut page_token: Option<String> = None;

        loop {
            let query = ListEventsQuery {
                time_min: Some(time_min.to_rfc3339()),
                time_max: Some(time_max.to_rfc3339()),
                max_results: Some(options.max_results.unwrap_or(MAX_RESULTS_CAP)),
                page_token: page_token.clone(),
                sync_token: None,
                single_events: true,
                order_by_start_time: true,
            };

            let page = self
                .fetch_page(user_id, access_token, &query, cancel)
                .await?;

            self.process_page(user_id, &page, &mut report).await;

            if page.next_sync_token.is_some() {
                next_sync_token = page.next_sync_token.clone();
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok((report, next_sync_token))
    }

    async fn incremental_sync(
        &self,
        user_id: Uuid,
        options: &SyncOptions,
        sync_token: &str,
        access_token: &mut String,
        cancel: &CancellationToken,
    ) -> Result<(SyncReport, Option<String>), AppError> {
        let mut report = SyncReport::default();
        let mut next_sync_token = None;
        let mut page_token: Option<String> = None;

        loop {
            // The sync token names the series; page tokens walk within it
            let query = ListEventsQuery {
                time_min: None,
                time_max: None,
                max_results: Some(options.max_results.unwrap_or(MAX_RESULTS_CAP)),
                page_token: page_token.clone(),
                sync_token: page_token.is_none().then(|| sync_token.to_string()),
                single_events: true,
                order_by_start_time: false,
            };

            let page = self
                .fetch_page(user_id, access_token, &query, cancel)
                .await?;

            self.process_page(user_id, &page, &mut report).await;

            if page.next_sync_token.is_some() {
                next_sync_token = page.next_sync_token.clone();
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok((report, next_sync_token))
    }

    /// Fetch one page through the retry executor. An auth failure is
    /// recovered once by forcing a token refresh; a second auth failure
    /// means the authorization is dead, so stored credentials are cleared
    /// and the session torn down.
    async fn fetch_page(
        &self,
        user_id: Uuid,
        access_token: &mut String,
        query: &ListEventsQuery,
        cancel: &CancellationToken,
    ) -> Result<EventsListResponse, AppError> {
        match self.fetch_page_once(access_token, query, cancel).await {
            Err(err) if err.is_auth() => {
                let refreshed = self.tokens.refresh(user_id, cancel).await?;
                *access_token = refreshed.access_token;
                match self.fetch_page_once(access_token, query, cancel).await {
                    Err(err) if err.is_auth() => {
                        warn!(
                            user_id = %user_id,
                            error = %err,
                            "auth failure recurred after refresh, clearing credentials"
                        );
                        self.tokens.clear_credentials(user_id).await?;
                        Err(AppError::new(
                            ErrorKind::UpstreamAuth,
                            "upstream rejected refreshed credentials; session cleared",
                        ))
                    }
                    other => other.map_err(Into::into),
                }
            }
            other => other.map_err(Into::into),
        }
    }

    async fn fetch_page_once(
        &self,
        access_token: &str,
        query: &ListEventsQuery,
        cancel: &CancellationToken,
    ) -> Result<EventsListResponse, UpstreamError> {
        let google = self.google.clone();
        let access_token = access_token.to_string();
        let query = query.clone();

        retry::execute("calendar.events.list", &self.retry_policy, cancel, None, move || {
            let google = google.clone();
            let access_token = access_token.clone();
            let query = query.clone();
            async move { google.list_events(&access_token, &query).await }
        })
        .await
    }

    /// Reconcile one page of upstream events, accumulating counts and
    /// per-item errors. One bad item never aborts the page.
    async fn process_page(
        &self,
        user_id: Uuid,
        page: &EventsListResponse,
        report: &mut SyncReport,
    ) {
        for item in page.items.as_deref().unwrap_or_default() {
            report.processed += 1;

            let change = match map_event(item) {
                Ok(change) => change,
                Err(err) => {
                    report.errors.push(SyncItemError {
                        kind: "invalid-event".to_string(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            let result = match &change {
                UpstreamChange::Cancelled { google_event_id } => self
                    .events
                    .delete_by_google_id(&*self.db, user_id, google_event_id)
                    .await
                    .map(|removed| {
                        if removed {
                            report.deleted += 1;
                        }
                    }),
                UpstreamChange::Upsert(draft) => self
                    .events
                    .upsert_by_google_id(&*self.db, user_id, draft)
                    .await
                    .map(|outcome| match outcome {
                        UpsertOutcome::Created(_) => report.created += 1,
                        UpsertOutcome::Updated(_) => report.updated += 1,
                        UpsertOutcome::Unchanged(_) => {}
                    }),
            };

            if let Err(err) = result {
                report.errors.push(SyncItemError {
                    kind: err.kind.as_str().to_string(),
                    message: err.detail,
                });
            }
        }
    }
}
