//! Integration tests for the write-through mediator: upstream-first
//! ordering, rollback on upstream failure, and the delete/update special
//! cases.

use calsync::error::ErrorKind;
use calsync::models::event::Attendee;
use calsync::repositories::{EventFilter, EventRepository};
use calsync::writes::{CreateEventInput, UpdateEventInput};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

const EVENTS_PATH: &str = "/calendar/v3/calendars/primary/events";

fn valid_input(title: &str) -> CreateEventInput {
    CreateEventInput {
        title: title.to_string(),
        description: Some("notes".to_string()),
        start_time: "2025-01-02T09:00:00Z".parse().unwrap(),
        end_time: "2025-01-02T10:00:00Z".parse().unwrap(),
        location: None,
        attendees: vec![],
        is_all_day: false,
        timezone: "UTC".to_string(),
    }
}

#[tokio::test]
async fn test_create_event_happy_path() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "upstream-evt-1",
            "status": "confirmed",
            "summary": "Meeting",
            "start": {"dateTime": "2025-01-02T09:00:00Z"},
            "end": {"dateTime": "2025-01-02T10:00:00Z"},
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let created = state
        .writes
        .create_event(user.id, valid_input("Meeting"), &CancellationToken::new())
        .await
        .expect("create succeeds");

    assert_eq!(created.title, "Meeting");
    assert_eq!(created.google_event_id.as_deref(), Some("upstream-evt-1"));
    assert_eq!(created.source, "manual");

    let events = EventRepository::new(Arc::new(db.clone()));
    let (_, total) = events
        .list(user.id, &EventFilter::default())
        .await
        .expect("list");
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_create_rejected_at_validation_without_upstream_call() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    // Any POST would violate the expect(0) below
    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock)
        .await;

    // end < start
    let mut input = valid_input("Meeting");
    input.start_time = "2025-01-02T10:00:00Z".parse().unwrap();
    input.end_time = "2025-01-02T09:00:00Z".parse().unwrap();

    let err = state
        .writes
        .create_event(user.id, input, &CancellationToken::new())
        .await
        .expect_err("validation must fail");
    assert_eq!(err.kind, ErrorKind::Validation);

    let events = EventRepository::new(Arc::new(db.clone()));
    let (_, total) = events
        .list(user.id, &EventFilter::default())
        .await
        .expect("list");
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_empty_title_rejected() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    let err = state
        .writes
        .create_event(user.id, valid_input("   "), &CancellationToken::new())
        .await
        .expect_err("validation must fail");
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_malformed_attendee_email_rejected() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    let mut input = valid_input("Meeting");
    input.attendees = vec![Attendee {
        email: "definitely-not-an-email".to_string(),
        display_name: None,
        optional: false,
        response_status: None,
    }];

    let err = state
        .writes
        .create_event(user.id, input, &CancellationToken::new())
        .await
        .expect_err("validation must fail");
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_upstream_failure_rolls_back_local_state() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .mount(&mock)
        .await;

    let err = state
        .writes
        .create_event(user.id, valid_input("Meeting"), &CancellationToken::new())
        .await
        .expect_err("upstream failure surfaces");
    assert_eq!(err.kind, ErrorKind::UpstreamNetwork);

    // Subsequent list must not show the event
    let events = EventRepository::new(Arc::new(db.clone()));
    let (items, total) = events
        .list(user.id, &EventFilter::default())
        .await
        .expect("list");
    assert_eq!(total, 0);
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_update_merges_sparse_fields_into_full_payload() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "upstream-evt-1",
            "summary": "Original",
            "start": {"dateTime": "2025-01-02T09:00:00Z"},
            "end": {"dateTime": "2025-01-02T10:00:00Z"},
        })))
        .mount(&mock)
        .await;

    let created = state
        .writes
        .create_event(user.id, valid_input("Original"), &CancellationToken::new())
        .await
        .expect("create");

    // The PUT body must carry the merged full representation: the new
    // title plus the retained original description
    Mock::given(method("PUT"))
        .and(path_regex(format!("{}/upstream-evt-1$", EVENTS_PATH)))
        .and(body_string_contains("Renamed"))
        .and(body_string_contains("notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "upstream-evt-1",
            "summary": "Renamed",
            "start": {"dateTime": "2025-01-02T09:00:00Z"},
            "end": {"dateTime": "2025-01-02T10:00:00Z"},
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let updated = state
        .writes
        .update_event(
            user.id,
            created.id,
            UpdateEventInput {
                title: Some("Renamed".to_string()),
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .expect("update succeeds");

    assert_eq!(updated.title, "Renamed");
    // Unpatched fields retain their stored values
    assert_eq!(updated.description.as_deref(), Some("notes"));
}

#[tokio::test]
async fn test_update_rejects_inverted_merged_range() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "upstream-evt-1",
        })))
        .mount(&mock)
        .await;

    let created = state
        .writes
        .create_event(user.id, valid_input("Meeting"), &CancellationToken::new())
        .await
        .expect("create");

    // Moving the end before the stored start must fail validation
    let err = state
        .writes
        .update_event(
            user.id,
            created.id,
            UpdateEventInput {
                end_time: Some("2025-01-02T08:00:00Z".parse().unwrap()),
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .expect_err("validation must fail");
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_delete_treats_upstream_gone_as_success() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "upstream-evt-1",
        })))
        .mount(&mock)
        .await;

    let created = state
        .writes
        .create_event(user.id, valid_input("Meeting"), &CancellationToken::new())
        .await
        .expect("create");

    Mock::given(method("DELETE"))
        .and(path_regex(format!("{}/upstream-evt-1$", EVENTS_PATH)))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&mock)
        .await;

    state
        .writes
        .delete_event(user.id, created.id, &CancellationToken::new())
        .await
        .expect("delete succeeds despite upstream 404");

    let events = EventRepository::new(Arc::new(db.clone()));
    let (_, total) = events
        .list(user.id, &EventFilter::default())
        .await
        .expect("list");
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_delete_upstream_failure_keeps_local_row() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "upstream-evt-1",
        })))
        .mount(&mock)
        .await;

    let created = state
        .writes
        .create_event(user.id, valid_input("Meeting"), &CancellationToken::new())
        .await
        .expect("create");

    Mock::given(method("DELETE"))
        .and(path_regex(format!("{}/upstream-evt-1$", EVENTS_PATH)))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .mount(&mock)
        .await;

    let err = state
        .writes
        .delete_event(user.id, created.id, &CancellationToken::new())
        .await
        .expect_err("upstream failure surfaces");
    assert_eq!(err.kind, ErrorKind::UpstreamNetwork);

    let events = EventRepository::new(Arc::new(db.clone()));
    let (_, total) = events
        .list(user.id, &EventFilter::default())
        .await
        .expect("list");
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_delete_of_foreign_event_is_opaque() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let owner = test_utils::insert_authed_user(&db).await;
    let intruder = test_utils::insert_authed_user(&db).await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "upstream-evt-1",
        })))
        .mount(&mock)
        .await;

    let created = state
        .writes
        .create_event(owner.id, valid_input("Private"), &CancellationToken::new())
        .await
        .expect("create");

    let err = state
        .writes
        .delete_event(intruder.id, created.id, &CancellationToken::new())
        .await
        .expect_err("foreign event must be invisible");
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_recurring_auth_failure_clears_session_and_rolls_back() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    // 401 on the first attempt and again after the forced refresh
    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .expect(2)
        .mount(&mock)
        .await;

    let err = state
        .writes
        .create_event(user.id, valid_input("Meeting"), &CancellationToken::new())
        .await
        .expect_err("recurring auth failure surfaces");

    assert_eq!(err.kind, ErrorKind::UpstreamAuth);
    assert!(err.detail.contains("session cleared"));

    // Stored credentials are gone and the local transaction rolled back
    let tokens = state.tokens.load(user.id).await.expect("load");
    assert!(tokens.is_none());

    let events = EventRepository::new(Arc::new(db.clone()));
    let (_, total) = events
        .list(user.id, &EventFilter::default())
        .await
        .expect("list");
    assert_eq!(total, 0);
}
