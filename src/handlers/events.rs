//! # Event Handlers
//!
//! Read endpoints over the local replica and write-through mutations
//! against the upstream calendar.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::handlers::{ApiResponse, Pagination};
use crate::models::event::{EventResponse, EventSource, EventStatus};
use crate::repositories::{EventFilter, SourceFilter};
use crate::server::AppState;
use crate::writes::{CreateEventInput, UpdateEventInput};

/// Query string for the event list endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub search: Option<String>,
}

/// Query string for custom ranges
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Query string for free-text search
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<u64>,
}

/// One page of events plus pagination metadata
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventPage {
    pub events: Vec<EventResponse>,
    pub pagination: Pagination,
}

impl ListQuery {
    fn into_filter(self) -> Result<EventFilter, AppError> {
        let status = self
            .status
            .as_deref()
            .map(|raw| {
                EventStatus::parse(raw)
                    .ok_or_else(|| AppError::validation(format!("unknown status '{}'", raw)))
            })
            .transpose()?;

        let source = match self.source.as_deref() {
            None | Some("all") => SourceFilter::All,
            Some(raw) => EventSource::parse(raw)
                .map(SourceFilter::Only)
                .ok_or_else(|| AppError::validation(format!("unknown source '{}'", raw)))?,
        };

        Ok(EventFilter {
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(crate::repositories::event::DEFAULT_PAGE_LIMIT),
            start_date: self.start_date,
            end_date: self.end_date,
            status,
            source,
            search: self.search,
        }
        .normalized())
    }
}

/// Paginated, filtered event listing
#[utoipa::path(
    get,
    path = "/api/v1/calendar/events",
    responses(
        (status = 200, description = "Event page", body = ApiResponse<EventPage>),
        (status = 401, description = "Not authenticated")
    ),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<EventPage>>, AppError> {
    let filter = query.into_filter()?;
    let (items, total) = state.events.list(current_user.user_id, &filter).await?;

    Ok(Json(ApiResponse::new(page_response(&filter, items, total))))
}

/// Events within a canonical range: today, week, month, or custom
#[utoipa::path(
    get,
    path = "/api/v1/calendar/events/range/{range}",
    params(("range" = String, Path, description = "today | week | month | custom")),
    responses(
        (status = 200, description = "Events in range", body = ApiResponse<EventPage>),
        (status = 400, description = "Unknown range or missing custom bounds")
    ),
    tag = "events"
)]
pub async fn list_events_in_range(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(range): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<ApiResponse<EventPage>>, AppError> {
    let (start, end) = resolve_range(&range, &query)?;

    let filter = EventFilter {
        page: 1,
        limit: crate::repositories::event::MAX_PAGE_LIMIT,
        start_date: Some(start),
        end_date: Some(end),
        ..Default::default()
    };

    let (items, total) = state.events.list(current_user.user_id, &filter).await?;
    Ok(Json(ApiResponse::new(page_response(&filter, items, total))))
}

/// Single event by id
#[utoipa::path(
    get,
    path = "/api/v1/calendar/events/{id}",
    params(("id" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event", body = ApiResponse<EventResponse>),
        (status = 404, description = "No such event for this user")
    ),
    tag = "events"
)]
pub async fn get_event(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<EventResponse>>, AppError> {
    let event = state.events.find_by_id(current_user.user_id, id).await?;
    Ok(Json(ApiResponse::new(EventResponse::from(event))))
}

/// Write-through event creation
#[utoipa::path(
    post,
    path = "/api/v1/calendar/events",
    request_body = CreateEventInput,
    responses(
        (status = 200, description = "Created event", body = ApiResponse<EventResponse>),
        (status = 400, description = "Validation failed"),
        (status = 502, description = "Upstream rejected the write")
    ),
    tag = "events"
)]
pub async fn create_event(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateEventInput>,
) -> Result<Json<ApiResponse<EventResponse>>, AppError> {
    let cancel = CancellationToken::new();
    let created = state
        .writes
        .create_event(current_user.user_id, input, &cancel)
        .await?;

    Ok(Json(
        ApiResponse::new(EventResponse::from(created)).with_message("event created"),
    ))
}

/// Write-through sparse update
#[utoipa::path(
    put,
    path = "/api/v1/calendar/events/{id}",
    params(("id" = Uuid, Path, description = "Event id")),
    request_body = UpdateEventInput,
    responses(
        (status = 200, description = "Updated event", body = ApiResponse<EventResponse>),
        (status = 404, description = "No such event for this user")
    ),
    tag = "events"
)]
pub async fn update_event(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateEventInput>,
) -> Result<Json<ApiResponse<EventResponse>>, AppError> {
    let cancel = CancellationToken::new();
    let updated = state
        .writes
        .update_event(current_user.user_id, id, input, &cancel)
        .await?;

    Ok(Json(
        ApiResponse::new(EventResponse::from(updated)).with_message("event updated"),
    ))
}

/// Write-through delete
#[utoipa::path(
    delete,
    path = "/api/v1/calendar/events/{id}",
    params(("id" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event deleted"),
        (status = 404, description = "No such event for this user")
    ),
    tag = "events"
)]
pub async fn delete_event(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let cancel = CancellationToken::new();
    state
        .writes
        .delete_event(current_user.user_id, id, &cancel)
        .await?;

    Ok(Json(
        ApiResponse::new(serde_json::json!({ "deleted": true })).with_message("event deleted"),
    ))
}

/// Free-text search over titles and descriptions
#[utoipa::path(
    get,
    path = "/api/v1/calendar/search",
    params(("q" = String, Query, description = "Search term, at least two characters")),
    responses(
        (status = 200, description = "Matching events", body = ApiResponse<EventPage>),
        (status = 400, description = "Search term too short")
    ),
    tag = "events"
)]
pub async fn search_events(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<EventPage>>, AppError> {
    let term = query.q.trim();
    if term.chars().count() < 2 {
        return Err(AppError::validation(
            "search term must be at least two characters",
        ));
    }

    let filter = EventFilter {
        page: 1,
        limit: query
            .limit
            .unwrap_or(crate::repositories::event::DEFAULT_PAGE_LIMIT),
        search: Some(term.to_string()),
        ..Default::default()
    }
    .normalized();

    let (items, total) = state.events.list(current_user.user_id, &filter).await?;
    Ok(Json(ApiResponse::new(page_response(&filter, items, total))))
}

fn page_response(
    filter: &EventFilter,
    items: Vec<crate::models::event::Model>,
    total: u64,
) -> EventPage {
    let has_next = filter.page * filter.limit < total;
    EventPage {
        events: items.into_iter().map(EventResponse::from).collect(),
        pagination: Pagination {
            page: filter.page,
            limit: filter.limit,
            total,
            has_next,
        },
    }
}

/// Resolve a named range into UTC bounds. Day-based ranges anchor at the
/// current UTC midnight.
fn resolve_range(
    range: &str,
    query: &RangeQuery,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let day_start = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc();

    match range {
        "today" => Ok((day_start, day_start + Duration::days(1))),
        "week" => Ok((day_start, day_start + Duration::days(7))),
        "month" => Ok((day_start, day_start + Duration::days(31))),
        "custom" => {
            let start = query
                .start
                .ok_or_else(|| AppError::validation("custom range requires 'start'"))?;
            let end = query
                .end
                .ok_or_else(|| AppError::validation("custom range requires 'end'"))?;
            if end < start {
                return Err(AppError::validation("range end precedes start"));
            }
            Ok((start, end))
        }
        other => Err(AppError::validation(format!("unknown range '{}'", other))),
    }
}
