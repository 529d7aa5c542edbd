//! # Write-Through Mediator
//!
//! Create/update/delete operations that mutate the upstream calendar and
//! the local replica together. The ordering is fixed: validate, open a
//! local transaction, call upstream through the retry executor, apply the
//! local mutation, commit. Any upstream failure rolls the local side back,
//! so the replica never acknowledges a write the upstream rejected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, ErrorKind};
use crate::google::GoogleClient;
use crate::google::types::{EventAttendee, EventDateTime, EventPayload};
use crate::models::event::{Attendee, EventSource, EventStatus, Model as EventModel};
use crate::repositories::{EventPatch, EventRepository, NewEvent, event};
use crate::retry::{self, RetryPolicy, UpstreamError};
use crate::tokens::TokenManager;

/// Request body for event creation.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateEventInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// Sparse request body for event updates; absent fields are unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateEventInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Option<Vec<Attendee>>,
    #[serde(default)]
    pub is_all_day: Option<bool>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub status: Option<EventStatus>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Mediates writes across the upstream calendar and the local replica
pub struct WriteThrough {
    db: Arc<DatabaseConnection>,
    events: EventRepository,
    tokens: Arc<TokenManager>,
    google: Arc<GoogleClient>,
    retry_policy: RetryPolicy,
}

impl WriteThrough {
    pub fn new(
        db: Arc<DatabaseConnection>,
        tokens: Arc<TokenManager>,
        google: Arc<GoogleClient>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            events: EventRepository::new(db.clone()),
            db,
            tokens,
            google,
            retry_policy,
        }
    }

    /// Create the event upstream, then locally, in one accepted unit.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn create_event(
        &self,
        user_id: Uuid,
        input: CreateEventInput,
        cancel: &CancellationToken,
    ) -> Result<EventModel, AppError> {
        if input.title.trim().is_empty() {
            return Err(AppError::validation("title must not be empty"));
        }
        event::validate_time_range(&input.start_time, &input.end_time)?;
        event::validate_attendees(&input.attendees)?;

        let payload = build_payload(
            &input.title,
            input.description.as_deref(),
            input.location.as_deref(),
            input.start_time,
            input.end_time,
            input.is_all_day,
            &input.timezone,
            &input.attendees,
        );

        let txn = self.db.begin().await?;

        let google = self.google.clone();
        let upstream_event = match self
            .with_access_token("calendar.events.insert", user_id, cancel, move |token| {
                let google = google.clone();
                let payload = payload.clone();
                async move { google.insert_event(&token, &payload).await }
            })
            .await
        {
            Ok(event) => event,
            Err(err) => {
                txn.rollback().await?;
                warn!(error = %err, "upstream create rejected, rolled back");
                return Err(err);
            }
        };

        let created = self
            .events
            .create(
                &txn,
                user_id,
                NewEvent {
                    google_event_id: upstream_event.id.clone(),
                    title: input.title,
                    description: input.description,
                    start_time: input.start_time,
                    end_time: input.end_time,
                    location: input.location,
                    attendees: input.attendees,
                    is_all_day: input.is_all_day,
                    timezone: input.timezone,
                    status: EventStatus::Confirmed,
                    source: EventSource::Manual,
                },
            )
            .await?;

        txn.commit().await?;
        info!(event_id = %created.id, "event created");
        Ok(created)
    }

    /// Merge the sparse input over the stored row, push the full
    /// representation upstream, then apply the patch locally.
    #[instrument(skip_all, fields(user_id = %user_id, event_id = %event_id))]
    pub async fn update_event(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        input: UpdateEventInput,
        cancel: &CancellationToken,
    ) -> Result<EventModel, AppError> {
        if let Some(title) = &input.title
            && title.trim().is_empty()
        {
            return Err(AppError::validation("title must not be empty"));
        }
        if let Some(attendees) = &input.attendees {
            event::validate_attendees(attendees)?;
        }

        let txn = self.db.begin().await?;

        let existing = self.events.find_by_id(user_id, event_id).await?;

        // The Events API requires a complete representation; merge the
        // sparse patch over the stored row to build it.
        let merged_title = input.title.clone().unwrap_or_else(|| existing.title.clone());
        let merged_description = input
            .description
            .clone()
            .or_else(|| existing.description.clone());
        let merged_start = input.start_time.unwrap_or(existing.start_time.to_utc());
        let merged_end = input.end_time.unwrap_or(existing.end_time.to_utc());
        let merged_location = input.location.clone().or_else(|| existing.location.clone());
        let merged_attendees = input
            .attendees
            .clone()
            .unwrap_or_else(|| existing.attendee_list());
        let merged_all_day = input.is_all_day.unwrap_or(existing.is_all_day);
        let merged_timezone = input
            .timezone
            .clone()
            .unwrap_or_else(|| existing.timezone.clone());

        event::validate_time_range(&merged_start, &merged_end)?;

        if let Some(google_event_id) = existing.google_event_id.clone() {
            let payload = build_payload(
                &merged_title,
                merged_description.as_deref(),
                merged_location.as_deref(),
                merged_start,
                merged_end,
                merged_all_day,
                &merged_timezone,
                &merged_attendees,
            );

            let google = self.google.clone();
            if let Err(err) = self
                .with_access_token("calendar.events.update", user_id, cancel, move |token| {
                    let google = google.clone();
                    let payload = payload.clone();
                    let google_event_id = google_event_id.clone();
                    async move { google.update_event(&token, &google_event_id, &payload).await }
                })
                .await
            {
                txn.rollback().await?;
                warn!(error = %err, "upstream update rejected, rolled back");
                return Err(err);
            }
        }

        let updated = self
            .events
            .update(
                &txn,
                user_id,
                event_id,
                EventPatch {
                    title: input.title,
                    description: input.description,
                    start_time: input.start_time,
                    end_time: input.end_time,
                    location: input.location,
                    attendees: input.attendees,
                    is_all_day: input.is_all_day,
                    timezone: input.timezone,
                    status: input.status,
                },
            )
            .await?;

        txn.commit().await?;
        info!(event_id = %updated.id, "event updated");
        Ok(updated)
    }

    /// Delete upstream (absent counts as deleted), then locally.
    #[instrument(skip_all, fields(user_id = %user_id, event_id = %event_id))]
    pub async fn delete_event(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let txn = self.db.begin().await?;

        let existing = self.events.find_by_id(user_id, event_id).await?;

        if let Some(google_event_id) = existing.google_event_id.clone() {
            let google = self.google.clone();
            let result = self
                .with_access_token("calendar.events.delete", user_id, cancel, move |token| {
                    let google = google.clone();
                    let google_event_id = google_event_id.clone();
                    async move { google.delete_event(&token, &google_event_id).await }
                })
                .await;

            match result {
                Ok(()) => {}
                // Already gone upstream: the deletion's goal is met
                Err(err) if err.kind == ErrorKind::NotFound => {
                    info!("event already absent upstream");
                }
                Err(err) => {
                    txn.rollback().await?;
                    warn!(error = %err, "upstream delete rejected, rolled back");
                    return Err(err);
                }
            }
        }

        self.events.delete(&txn, user_id, event_id).await?;
        txn.commit().await?;
        info!("event deleted");
        Ok(())
    }

    /// Resolve a live access token and run the upstream call through the
    /// retry executor, recovering once from a stale credential. A second
    /// auth failure clears stored credentials and tears the session down.
    async fn with_access_token<T, F, Fut>(
        &self,
        op: &str,
        user_id: Uuid,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, AppError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let token = self.tokens.ensure_valid(user_id, cancel).await?;

        let result =
            retry::execute(op, &self.retry_policy, cancel, None, || call(token.clone())).await;

        match result {
            Err(err) if err.is_auth() => {
                let refreshed = self.tokens.refresh(user_id, cancel).await?;
                let retried = retry::execute(op, &self.retry_policy, cancel, None, || {
                    call(refreshed.access_token.clone())
                })
                .await;

                match retried {
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
}

/// Build the full upstream payload from local fields.
#[allow(clippy::too_many_arguments)]
fn build_payload(
    title: &str,
    description: Option<&str>,
    location: Option<&str>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    is_all_day: bool,
    timezone: &str,
    attendees: &[Attendee],
) -> EventPayload {
    let boundary = |at: DateTime<Utc>| {
        if is_all_day {
            EventDateTime {
                date_time: None,
                date: Some(at.format("%Y-%m-%d").to_string()),
                time_zone: None,
            }
        } else {
            EventDateTime {
                date_time: Some(at.to_rfc3339()),
                date: None,
                time_zone: Some(timezone.to_string()),
            }
        }
    };

    EventPayload {
        summary: title.to_string(),
        description: description.map(str::to_string),
        location: location.map(str::to_string),
        start: boundary(start_time),
        end: boundary(end_time),
        attendees: if attendees.is_empty() {
            None
        } else {
            Some(
                attendees
                    .iter()
                    .map(|attendee| EventAttendee {
                        email: Some(attendee.email.clone()),
                        display_name: attendee.display_name.clone(),
                        optional: attendee.optional,
                        response_status: attendee.response_status.clone(),
                    })
                    .collect(),
            )
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_timed_payload() {
        let start = "2025-01-02T10:00:00Z".parse().unwrap();
        let end = "2025-01-02T11:00:00Z".parse().unwrap();

        let payload = build_payload(
            "Meeting",
            Some("notes"),
            None,
            start,
            end,
            false,
            "Europe/Berlin",
            &[],
        );

        assert_eq!(payload.summary, "Meeting");
        assert!(payload.start.date_time.is_some());
        assert!(payload.start.date.is_none());
        assert_eq!(payload.start.time_zone.as_deref(), Some("Europe/Berlin"));
        assert!(payload.attendees.is_none());
    }

    #[test]
    fn test_build_all_day_payload() {
        let start = "2025-01-02T00:00:00Z".parse().unwrap();
        let end = "2025-01-03T00:00:00Z".parse().unwrap();

        let payload = build_payload("Offsite", None, None, start, end, true, "UTC", &[]);

        assert_eq!(payload.start.date.as_deref(), Some("2025-01-02"));
        assert!(payload.start.date_time.is_none());
        assert_eq!(payload.end.date.as_deref(), Some("2025-01-03"));
    }

    #[test]
    fn test_attendees_carried_into_payload() {
        let start = "2025-01-02T10:00:00Z".parse().unwrap();
        let end = "2025-01-02T11:00:00Z".parse().unwrap();
        let attendees = vec![Attendee {
            email: "a@example.com".to_string(),
            display_name: Some("A".to_string()),
            optional: true,
            response_status: None,
        }];

        let payload = build_payload("Call", None, None, start, end, false, "UTC", &attendees);

        let wire = payload.attendees.expect("attendees present");
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].email.as_deref(), Some("a@example.com"));
        assert!(wire[0].optional);
    }
}
