//! Event entity model
//!
//! This module contains the SeaORM entity model for the events table, the
//! local replica of upstream calendar events, along with the attendee and
//! status/source value types shared across the facade and sync engine.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Event entity representing one locally replicated calendar event
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    /// Unique identifier for the event (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Upstream Google event identifier (unique per user when present)
    pub google_event_id: Option<String>,

    /// Event title
    pub title: String,

    /// Event description
    pub description: Option<String>,

    /// Start instant
    pub start_time: DateTimeWithTimeZone,

    /// End instant (never before start)
    pub end_time: DateTimeWithTimeZone,

    /// Free-form location
    pub location: Option<String>,

    /// Attendee list serialized as a JSON array
    #[sea_orm(column_type = "JsonBinary")]
    pub attendees: Option<JsonValue>,

    /// All-day flag
    pub is_all_day: bool,

    /// IANA timezone identifier
    pub timezone: String,

    /// Status: confirmed | tentative | cancelled
    pub status: String,

    /// Origin of the row: google | manual | imported
    pub source: String,

    /// Upstream last-modified instant used for conflict ordering
    pub last_modified: DateTimeWithTimeZone,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Event status values accepted by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "confirmed",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "confirmed" => Some(EventStatus::Confirmed),
            "tentative" => Some(EventStatus::Tentative),
            "cancelled" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }
}

/// Origin of a replica row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Google,
    Manual,
    Imported,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Google => "google",
            EventSource::Manual => "manual",
            EventSource::Imported => "imported",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "google" => Some(EventSource::Google),
            "manual" => Some(EventSource::Manual),
            "imported" => Some(EventSource::Imported),
            _ => None,
        }
    }
}

/// A single event attendee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Attendee {
    /// Attendee email address
    pub email: String,
    /// Display name, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Whether attendance is optional
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    /// Response status (needsAction, accepted, declined, tentative)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

impl Model {
    /// Deserialize the attendee list, treating absent or malformed JSON as
    /// an empty list.
    pub fn attendee_list(&self) -> Vec<Attendee> {
        self.attendees
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

/// API representation of a stored event
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventResponse {
    /// Event ID
    pub id: Uuid,
    /// Upstream Google event ID, if linked
    pub google_event_id: Option<String>,
    /// Title
    pub title: String,
    /// Description
    pub description: Option<String>,
    /// Start instant (RFC 3339)
    pub start_time: String,
    /// End instant (RFC 3339)
    pub end_time: String,
    /// Location
    pub location: Option<String>,
    /// Attendees
    pub attendees: Vec<Attendee>,
    /// All-day flag
    pub is_all_day: bool,
    /// IANA timezone
    pub timezone: String,
    /// Status
    pub status: String,
    /// Source
    pub source: String,
    /// Last-modified instant (RFC 3339)
    pub last_modified: String,
}

impl From<Model> for EventResponse {
    fn from(model: Model) -> Self {
        let attendees = model.attendee_list();
        Self {
            id: model.id,
            google_event_id: model.google_event_id,
            title: model.title,
            description: model.description,
            start_time: model.start_time.to_rfc3339(),
            end_time: model.end_time.to_rfc3339(),
            location: model.location,
            attendees,
            is_all_day: model.is_all_day,
            timezone: model.timezone,
            status: model.status,
            source: model.source,
            last_modified: model.last_modified.to_rfc3339(),
        }
    }
}
