//! Google Calendar and OAuth wire types.
//!
//! Upstream payloads are dynamic; these records keep every field optional
//! and ignore anything unknown. All coercion into the local shape happens
//! in [`map_event`] so the sync engine only ever sees sanitized values.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::event::Attendee;

/// OAuth token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Userinfo endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserinfo {
    /// Google subject identifier
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Either a timed or an all-day boundary of a calendar event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDateTime {
    /// RFC 3339 instant for timed events
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    /// `YYYY-MM-DD` for all-day events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Attendee entry on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAttendee {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(
        rename = "responseStatus",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub response_status: Option<String>,
}

/// A calendar event as returned by the Events API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start: Option<EventDateTime>,
    #[serde(default)]
    pub end: Option<EventDateTime>,
    #[serde(default)]
    pub attendees: Option<Vec<EventAttendee>>,
    /// Upstream last-modified instant
    #[serde(default)]
    pub updated: Option<String>,
}

/// One page of `events.list`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsListResponse {
    #[serde(default)]
    pub items: Option<Vec<CalendarEvent>>,
    #[serde(rename = "nextPageToken", default)]
    pub next_page_token: Option<String>,
    #[serde(rename = "nextSyncToken", default)]
    pub next_sync_token: Option<String>,
}

/// Payload sent to `events.insert` / `events.update`
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventPayload {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<EventAttendee>>,
}

/// Request body for `events.watch`
#[derive(Debug, Clone, Serialize)]
pub struct WatchRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub address: String,
    pub token: String,
}

/// Response from `events.watch`
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelResponse {
    pub id: String,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
    #[serde(rename = "resourceUri", default)]
    pub resource_uri: Option<String>,
    /// Expiry as epoch milliseconds, stringly typed on the wire
    #[serde(default)]
    pub expiration: Option<String>,
}

/// Request body for `channels.stop`
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStopRequest {
    pub id: String,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
}

/// Sanitized upstream change the sync engine consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamChange {
    /// Event cancelled upstream; only the identifier survives
    Cancelled { google_event_id: String },
    /// Event created or updated upstream
    Upsert(EventDraft),
}

/// Fully coerced event fields ready for the local replica.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub google_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_all_day: bool,
    pub timezone: String,
    pub attendees: Vec<Attendee>,
    pub status: String,
    pub last_modified: DateTime<Utc>,
}

/// Errors while coercing an upstream event into the local shape.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MapError {
    #[error("event has no id")]
    MissingId,
    #[error("event {0} has no usable start or end")]
    MissingBoundary(String),
    #[error("event {0} has unparseable instant: {1}")]
    BadInstant(String, String),
}

/// Coerce one upstream event into a sanitized [`UpstreamChange`].
pub fn map_event(event: &CalendarEvent) -> Result<UpstreamChange, MapError> {
    let google_event_id = event.id.clone().ok_or(MapError::MissingId)?;

    if event.status.as_deref() == Some("cancelled") {
        return Ok(UpstreamChange::Cancelled { google_event_id });
    }

    let start = event
        .start
        .as_ref()
        .ok_or_else(|| MapError::MissingBoundary(google_event_id.clone()))?;
    let end = event
        .end
        .as_ref()
        .ok_or_else(|| MapError::MissingBoundary(google_event_id.clone()))?;

    let is_all_day = start.date_time.is_none() && start.date.is_some();
    let start_time = parse_boundary(start, &google_event_id)?;
    let end_time = parse_boundary(end, &google_event_id)?;

    let timezone = start
        .time_zone
        .clone()
        .unwrap_or_else(|| "UTC".to_string());

    let attendees = event
        .attendees
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|wire| {
            // Attendees without an email cannot be represented locally
            let email = wire.email.clone()?;
            Some(Attendee {
                email,
                display_name: wire.display_name.clone(),
                optional: wire.optional,
                response_status: wire.response_status.clone(),
            })
        })
        .collect();

    let status = match event.status.as_deref() {
        Some("tentative") => "tentative",
        _ => "confirmed",
    }
    .to_string();

    let last_modified = event
        .updated
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(UpstreamChange::Upsert(EventDraft {
        google_event_id,
        title: event
            .summary
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "(untitled)".to_string()),
        description: event.description.clone(),
        location: event.location.clone(),
        start_time,
        end_time,
        is_all_day,
        timezone,
        attendees,
        status,
        last_modified,
    }))
}

fn parse_boundary(
    boundary: &EventDateTime,
    event_id: &str,
) -> Result<DateTime<Utc>, MapError> {
    if let Some(raw) = boundary.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| MapError::BadInstant(event_id.to_string(), format!("{}: {}", raw, e)));
    }

    if let Some(raw) = boundary.date.as_deref() {
        let date = raw
            .parse::<NaiveDate>()
            .map_err(|e| MapError::BadInstant(event_id.to_string(), format!("{}: {}", raw, e)))?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| MapError::BadInstant(event_id.to_string(), raw.to_string()))?;
        return Ok(Utc.from_utc_datetime(&midnight));
    }

    Err(MapError::MissingBoundary(event_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_event(id: &str) -> CalendarEvent {
        CalendarEvent {
            id: Some(id.to_string()),
            status: Some("confirmed".to_string()),
            summary: Some("Team sync".to_string()),
            description: Some("Weekly".to_string()),
            location: Some("Room 4".to_string()),
            start: Some(EventDateTime {
                date_time: Some("2025-03-01T10:00:00Z".to_string()),
                date: None,
                time_zone: Some("Europe/Berlin".to_string()),
            }),
            end: Some(EventDateTime {
                date_time: Some("2025-03-01T11:00:00Z".to_string()),
                date: None,
                time_zone: Some("Europe/Berlin".to_string()),
            }),
            attendees: Some(vec![
                EventAttendee {
                    email: Some("a@example.com".to_string()),
                    display_name: Some("A".to_string()),
                    optional: false,
                    response_status: Some("accepted".to_string()),
                },
                // No email; dropped during mapping
                EventAttendee {
                    email: None,
                    display_name: Some("Room".to_string()),
                    optional: true,
                    response_status: None,
                },
            ]),
            updated: Some("2025-03-01T09:00:00Z".to_string()),
        }
    }

    #[test]
    fn test_map_timed_event() {
        let change = map_event(&timed_event("evt-1")).expect("maps");
        let UpstreamChange::Upsert(draft) = change else {
            panic!("expected upsert");
        };

        assert_eq!(draft.google_event_id, "evt-1");
        assert_eq!(draft.title, "Team sync");
        assert_eq!(draft.timezone, "Europe/Berlin");
        assert!(!draft.is_all_day);
        assert_eq!(draft.attendees.len(), 1);
        assert_eq!(draft.attendees[0].email, "a@example.com");
        assert_eq!(draft.status, "confirmed");
        assert_eq!(
            draft.last_modified,
            "2025-03-01T09:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_map_all_day_event() {
        let mut event = timed_event("evt-2");
        event.start = Some(EventDateTime {
            date_time: None,
            date: Some("2025-03-02".to_string()),
            time_zone: None,
        });
        event.end = Some(EventDateTime {
            date_time: None,
            date: Some("2025-03-03".to_string()),
            time_zone: None,
        });

        let UpstreamChange::Upsert(draft) = map_event(&event).expect("maps") else {
            panic!("expected upsert");
        };
        assert!(draft.is_all_day);
        assert_eq!(draft.timezone, "UTC");
        assert_eq!(
            draft.start_time,
            "2025-03-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_map_cancelled_event() {
        let event = CalendarEvent {
            id: Some("evt-3".to_string()),
            status: Some("cancelled".to_string()),
            ..Default::default()
        };

        assert_eq!(
            map_event(&event).expect("maps"),
            UpstreamChange::Cancelled {
                google_event_id: "evt-3".to_string()
            }
        );
    }

    #[test]
    fn test_map_missing_id_rejected() {
        let event = CalendarEvent::default();
        assert_eq!(map_event(&event), Err(MapError::MissingId));
    }

    #[test]
    fn test_map_untitled_event() {
        let mut event = timed_event("evt-4");
        event.summary = None;

        let UpstreamChange::Upsert(draft) = map_event(&event).expect("maps") else {
            panic!("expected upsert");
        };
        assert_eq!(draft.title, "(untitled)");
    }

    #[test]
    fn test_map_missing_boundary_rejected() {
        let mut event = timed_event("evt-5");
        event.start = Some(EventDateTime::default());

        assert!(matches!(
            map_event(&event),
            Err(MapError::MissingBoundary(_))
        ));
    }

    #[test]
    fn test_unknown_wire_fields_ignored() {
        let raw = serde_json::json!({
            "id": "evt-6",
            "status": "confirmed",
            "summary": "Call",
            "kind": "calendar#event",
            "etag": "\"abc\"",
            "htmlLink": "https://calendar.google.com/event?eid=abc",
            "start": {"dateTime": "2025-03-01T10:00:00Z"},
            "end": {"dateTime": "2025-03-01T10:30:00Z"}
        });

        let event: CalendarEvent = serde_json::from_value(raw).expect("deserializes");
        assert!(map_event(&event).is_ok());
    }
}
