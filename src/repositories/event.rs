//! # Event Repository
//!
//! Transactional store facade for the local event replica: filtered and
//! paginated reads, sparse updates, and conflict-free upsert keyed on the
//! upstream event identifier. Ownership is enforced on every query; rows
//! belonging to another user are indistinguishable from absent rows.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseBackend,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::google::types::EventDraft;
use crate::models::event::{self, ActiveModel, Attendee, Entity, EventSource, EventStatus, Model};

/// Default page size for event listings.
pub const DEFAULT_PAGE_LIMIT: u64 = 50;
/// Maximum page size for event listings.
pub const MAX_PAGE_LIMIT: u64 = 100;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern compiles")
});

/// Source filter accepted by the list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceFilter {
    #[default]
    All,
    Only(EventSource),
}

/// Listing filters; everything optional except pagination.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub page: u64,
    pub limit: u64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<EventStatus>,
    pub source: SourceFilter,
    pub search: Option<String>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            start_date: None,
            end_date: None,
            status: None,
            source: SourceFilter::All,
            search: None,
        }
    }
}

impl EventFilter {
    /// Clamp pagination into the supported window.
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.limit = self.limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }
}

/// Fields for a new replica row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub google_event_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub attendees: Vec<Attendee>,
    pub is_all_day: bool,
    pub timezone: String,
    pub status: EventStatus,
    pub source: EventSource,
}

/// Sparse update; absent fields retain their stored values.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub attendees: Option<Vec<Attendee>>,
    pub is_all_day: Option<bool>,
    pub timezone: Option<String>,
    pub status: Option<EventStatus>,
}

/// Result of an upsert keyed on the upstream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(Uuid),
    Updated(Uuid),
    /// Present locally with an equal-or-newer last-modified instant
    Unchanged(Uuid),
}

/// Repository for the local event replica
pub struct EventRepository {
    db: Arc<DatabaseConnection>,
}

impl EventRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Filtered, paginated listing ordered ascending by start instant.
    /// Returns the page and the total count under the same filter.
    pub async fn list(
        &self,
        user_id: Uuid,
        filter: &EventFilter,
    ) -> Result<(Vec<Model>, u64), AppError> {
        let filter = filter.clone().normalized();
        let condition = build_condition(user_id, &filter, self.db.get_database_backend());

        let total = Entity::find()
            .filter(condition.clone())
            .count(&*self.db)
            .await?;

        let offset = (filter.page - 1) * filter.limit;
        let items = Entity::find()
            .filter(condition)
            .order_by_asc(event::Column::StartTime)
            .offset(offset)
            .limit(filter.limit)
            .all(&*self.db)
            .await?;

        Ok((items, total))
    }

    /// Fetch one owned event. Another user's row surfaces as not-found.
    pub async fn find_by_id(&self, user_id: Uuid, id: Uuid) -> Result<Model, AppError> {
        Entity::find_by_id(id)
            .filter(event::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| AppError::not_found("event not found"))
    }

    pub async fn find_by_google_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        google_event_id: &str,
    ) -> Result<Option<Model>, AppError> {
        Ok(Entity::find()
            .filter(event::Column::UserId.eq(user_id))
            .filter(event::Column::GoogleEventId.eq(google_event_id))
            .one(conn)
            .await?)
    }

    /// Insert a validated replica row.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        new_event: NewEvent,
    ) -> Result<Model, AppError> {
        validate_time_range(&new_event.start_time, &new_event.end_time)?;
        validate_attendees(&new_event.attendees)?;

        let now = Utc::now();
        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            google_event_id: Set(new_event.google_event_id),
            title: Set(new_event.title),
            description: Set(new_event.description),
            start_time: Set(new_event.start_time.into()),
            end_time: Set(new_event.end_time.into()),
            location: Set(new_event.location),
            attendees: Set(serialize_attendees(&new_event.attendees)),
            is_all_day: Set(new_event.is_all_day),
            timezone: Set(new_event.timezone),
            status: Set(new_event.status.as_str().to_string()),
            source: Set(new_event.source.as_str().to_string()),
            last_modified: Set(now.into()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        active.insert(conn).await.map_err(map_insert_err)
    }

    /// Apply a sparse patch over an owned row.
    pub async fn update<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        id: Uuid,
        patch: EventPatch,
    ) -> Result<Model, AppError> {
        let existing = Entity::find_by_id(id)
            .filter(event::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .ok_or_else(|| AppError::not_found("event not found"))?;

        let merged_start = patch.start_time.unwrap_or(existing.start_time.to_utc());
        let merged_end = patch.end_time.unwrap_or(existing.end_time.to_utc());
        validate_time_range(&merged_start, &merged_end)?;

        if let Some(attendees) = &patch.attendees {
            validate_attendees(attendees)?;
        }

        let now = Utc::now();
        let mut active: ActiveModel = existing.into();
        if let Some(title) = patch.title {
            active.title = Set(title);
        }
        if let Some(description) = patch.description {
            active.description = Set(Some(description));
        }
        if patch.start_time.is_some() {
            active.start_time = Set(merged_start.into());
        }
        if patch.end_time.is_some() {
            active.end_time = Set(merged_end.into());
        }
        if let Some(location) = patch.location {
            active.location = Set(Some(location));
        }
        if let Some(attendees) = patch.attendees {
            active.attendees = Set(serialize_attendees(&attendees));
        }
        if let Some(is_all_day) = patch.is_all_day {
            active.is_all_day = Set(is_all_day);
        }
        if let Some(timezone) = patch.timezone {
            active.timezone = Set(timezone);
        }
        if let Some(status) = patch.status {
            active.status = Set(status.as_str().to_string());
        }
        active.last_modified = Set(now.into());
        active.updated_at = Set(now.into());

        Ok(active.update(conn).await?)
    }

    /// Hard-delete an owned row.
    pub async fn delete<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<(), AppError> {
        let result = Entity::delete_many()
            .filter(event::Column::Id.eq(id))
            .filter(event::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::not_found("event not found"));
        }
        Ok(())
    }

    /// Delete by upstream identifier; returns whether a row existed.
    pub async fn delete_by_google_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        google_event_id: &str,
    ) -> Result<bool, AppError> {
        let result = Entity::delete_many()
            .filter(event::Column::UserId.eq(user_id))
            .filter(event::Column::GoogleEventId.eq(google_event_id))
            .exec(conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Upsert on `(user_id, google_event_id)`: insert when absent, replace
    /// all mutable fields when the draft carries a strictly newer
    /// last-modified instant, otherwise leave the row untouched.
    pub async fn upsert_by_google_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        draft: &EventDraft,
    ) -> Result<UpsertOutcome, AppError> {
        let existing = self
            .find_by_google_id(conn, user_id, &draft.google_event_id)
            .await?;

        match existing {
            None => {
                let now = Utc::now();
                let active = ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    google_event_id: Set(Some(draft.google_event_id.clone())),
                    title: Set(draft.title.clone()),
                    description: Set(draft.description.clone()),
                    start_time: Set(draft.start_time.into()),
                    end_time: Set(draft.end_time.into()),
                    location: Set(draft.location.clone()),
                    attendees: Set(serialize_attendees(&draft.attendees)),
                    is_all_day: Set(draft.is_all_day),
                    timezone: Set(draft.timezone.clone()),
                    status: Set(draft.status.clone()),
                    source: Set(EventSource::Google.as_str().to_string()),
                    last_modified: Set(draft.last_modified.into()),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };

                let inserted = active.insert(conn).await.map_err(map_insert_err)?;
                Ok(UpsertOutcome::Created(inserted.id))
            }
            Some(existing) => {
                if draft.last_modified <= existing.last_modified.to_utc() {
                    return Ok(UpsertOutcome::Unchanged(existing.id));
                }

                let id = existing.id;
                let mut active: ActiveModel = existing.into();
                active.title = Set(draft.title.clone());
                active.description = Set(draft.description.clone());
                active.start_time = Set(draft.start_time.into());
                active.end_time = Set(draft.end_time.into());
                active.location = Set(draft.location.clone());
                active.attendees = Set(serialize_attendees(&draft.attendees));
                active.is_all_day = Set(draft.is_all_day);
                active.timezone = Set(draft.timezone.clone());
                active.status = Set(draft.status.clone());
                active.last_modified = Set(draft.last_modified.into());
                active.updated_at = Set(Utc::now().into());
                active.update(conn).await?;

                Ok(UpsertOutcome::Updated(id))
            }
        }
    }
}

fn build_condition(user_id: Uuid, filter: &EventFilter, backend: DatabaseBackend) -> Condition {
    let mut condition = Condition::all().add(event::Column::UserId.eq(user_id));

    if let Some(start_date) = filter.start_date {
        condition = condition.add(event::Column::StartTime.gte(start_date));
    }
    if let Some(end_date) = filter.end_date {
        condition = condition.add(event::Column::StartTime.lte(end_date));
    }
    if let Some(status) = filter.status {
        condition = condition.add(event::Column::Status.eq(status.as_str()));
    }
    if let SourceFilter::Only(source) = filter.source {
        condition = condition.add(event::Column::Source.eq(source.as_str()));
    }
    if let Some(search) = filter.search.as_deref().filter(|q| !q.is_empty()) {
        condition = condition.add(search_condition(search, backend));
    }

    condition
}

/// Free-text predicate. On Postgres this is the same tsvector expression
/// the GIN index is built over, so the index serves the query; SQLite
/// falls back to LIKE.
fn search_condition(search: &str, backend: DatabaseBackend) -> Condition {
    if backend == DatabaseBackend::Postgres {
        Condition::all().add(Expr::cust_with_values(
            "to_tsvector('english', title || ' ' || COALESCE(description, '')) \
             @@ plainto_tsquery('english', ?)",
            [search],
        ))
    } else {
        Condition::any()
            .add(event::Column::Title.contains(search))
            .add(event::Column::Description.contains(search))
    }
}

/// Reject rows that would violate `end >= start`.
pub fn validate_time_range(
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> Result<(), AppError> {
    if end < start {
        return Err(AppError::validation("end time must not precede start time"));
    }
    Ok(())
}

/// Reject malformed attendee email addresses.
pub fn validate_attendees(attendees: &[Attendee]) -> Result<(), AppError> {
    for attendee in attendees {
        if !EMAIL_RE.is_match(&attendee.email) {
            return Err(AppError::validation(format!(
                "invalid attendee email: {}",
                attendee.email
            )));
        }
    }
    Ok(())
}

fn serialize_attendees(attendees: &[Attendee]) -> Option<serde_json::Value> {
    if attendees.is_empty() {
        None
    } else {
        serde_json::to_value(attendees).ok()
    }
}

fn map_insert_err(err: sea_orm::DbErr) -> AppError {
    if matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    ) {
        AppError::conflict("an event with this upstream id already exists")
    } else {
        err.into()
    }
}
