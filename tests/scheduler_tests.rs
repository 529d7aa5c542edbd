//! Integration tests for the background sweeper tick.

use calsync::config::AppConfig;
use calsync::repositories::{
    OAuthStateRepository, SyncStateRepository, WebhookSubscriptionRepository,
    webhook_subscription::NewSubscription,
};
use calsync::scheduler::Scheduler;
use calsync::sync::SyncOptions;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

const EVENTS_PATH: &str = "/calendar/v3/calendars/primary/events";

fn scheduler_for(state: &calsync::server::AppState, db: sea_orm::DatabaseConnection) -> Scheduler {
    Scheduler::new(
        state.config.clone(),
        Arc::new(db),
        state.sync_engine.clone(),
        state.webhooks.clone(),
    )
}

#[tokio::test]
async fn test_tick_runs_auto_sync_for_eligible_user() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [test_utils::upstream_event("evt-1", "Scheduled", "2025-03-01T09:00:00Z")],
            "nextSyncToken": "nst-seed",
        })))
        .mount(&mock)
        .await;

    // Establish a completed full sync so the user is auto-sync eligible
    state
        .sync_engine
        .run_sync(user.id, SyncOptions::default(), &CancellationToken::new())
        .await
        .expect("seed sync");

    // Age the cursor past the auto-sync interval
    let sync_states = SyncStateRepository::new(Arc::new(db.clone()));
    let eligible = sync_states
        .eligible_for_auto_sync(chrono::Utc::now() + chrono::Duration::minutes(1))
        .await
        .expect("query");
    assert_eq!(eligible.len(), 1);

    // One tick with a permissive interval runs the incremental sync
    let mut config = AppConfig::clone(&state.config);
    config.scheduler.auto_sync_interval_minutes = -1;
    let tick_state = calsync::server::AppState {
        config: Arc::new(config),
        ..state.clone()
    };

    let scheduler = scheduler_for(&tick_state, db.clone());
    scheduler
        .tick(&CancellationToken::new())
        .await
        .expect("tick succeeds");

    let cursor = sync_states
        .get(user.id)
        .await
        .expect("query")
        .expect("cursor");
    assert!(!cursor.sync_in_progress);
    assert_eq!(cursor.consecutive_errors, 0);
}

#[tokio::test]
async fn test_tick_skips_users_over_error_threshold() {
    let db = test_utils::setup_test_db().await;
    let user = test_utils::insert_user(&db).await;

    let sync_states = SyncStateRepository::new(Arc::new(db.clone()));
    sync_states.ensure(user.id).await.expect("ensure");
    sync_states
        .complete_sync(user.id, Some("nst-1".to_string()))
        .await
        .expect("complete");
    for _ in 0..5 {
        sync_states.fail_sync(user.id, "boom").await.expect("fail");
    }

    let eligible = sync_states
        .eligible_for_auto_sync(chrono::Utc::now() + chrono::Duration::minutes(1))
        .await
        .expect("query");
    assert!(eligible.is_empty());
}

#[tokio::test]
async fn test_tick_resubscribes_lapsed_webhook_channels() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    let subscriptions = WebhookSubscriptionRepository::new(Arc::new(db.clone()));
    subscriptions
        .create(NewSubscription {
            user_id: user.id,
            channel_id: Uuid::new_v4().to_string(),
            resource_id: "res-lapsed".to_string(),
            token: "old-token".to_string(),
            resource_uri: None,
            expires_at: Some(Utc::now() - Duration::hours(1)),
        })
        .await
        .expect("seed lapsed subscription");

    let expiration_ms = (Utc::now() + Duration::days(7)).timestamp_millis();
    Mock::given(method("POST"))
        .and(path_regex("/calendar/v3/calendars/primary/events/watch$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "fresh-channel-id",
            "resourceId": "fresh-resource-id",
            "expiration": expiration_ms.to_string(),
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let scheduler = scheduler_for(&state, db.clone());
    scheduler
        .tick(&CancellationToken::new())
        .await
        .expect("tick succeeds");

    // The lapsed channel stays inactive; a fresh one replaces it
    assert!(
        subscriptions
            .find_active_by_resource("res-lapsed")
            .await
            .expect("query")
            .is_empty()
    );
    let fresh = subscriptions
        .find_active_by_resource("fresh-resource-id")
        .await
        .expect("query");
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].user_id, user.id);
    assert_eq!(fresh[0].channel_id, "fresh-channel-id");
}

#[tokio::test]
async fn test_tick_skips_resubscription_without_credentials() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    // No tokens seeded: subscribe cannot get past ensure_valid
    let user = test_utils::insert_user(&db).await;

    let subscriptions = WebhookSubscriptionRepository::new(Arc::new(db.clone()));
    subscriptions
        .create(NewSubscription {
            user_id: user.id,
            channel_id: Uuid::new_v4().to_string(),
            resource_id: "res-lapsed".to_string(),
            token: "old-token".to_string(),
            resource_uri: None,
            expires_at: Some(Utc::now() - Duration::hours(1)),
        })
        .await
        .expect("seed lapsed subscription");

    Mock::given(method("POST"))
        .and(path_regex("/calendar/v3/calendars/primary/events/watch$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock)
        .await;

    // The tick absorbs the failed re-subscription and still succeeds
    let scheduler = scheduler_for(&state, db.clone());
    scheduler
        .tick(&CancellationToken::new())
        .await
        .expect("tick succeeds");

    assert!(
        subscriptions
            .find_active_by_user(user.id)
            .await
            .expect("query")
            .is_empty()
    );
}

#[tokio::test]
async fn test_tick_cleans_expired_oauth_states() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    let states = OAuthStateRepository::new(Arc::new(db.clone()));
    states
        .create("expired", None, -5)
        .await
        .expect("seed expired");
    states.create("live", None, 10).await.expect("seed live");

    let scheduler = scheduler_for(&state, db.clone());
    scheduler
        .tick(&CancellationToken::new())
        .await
        .expect("tick succeeds");

    assert!(states.consume("expired").await.expect("query").is_none());
    assert!(states.consume("live").await.expect("query").is_some());
}
