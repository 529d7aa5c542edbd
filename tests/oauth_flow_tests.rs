//! Integration tests for the OAuth orchestrator: state lifecycle, code
//! exchange, profile ingestion, and user upsert.

use calsync::error::ErrorKind;
use calsync::repositories::OAuthStateRepository;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

async fn mount_token_and_userinfo(mock: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "exchanged-access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "exchanged-refresh",
        })))
        .mount(mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/oauth2/v2/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "google-subject-1",
            "email": "new-user@example.com",
            "name": "New User",
            "picture": "https://example.com/pic.png",
        })))
        .mount(mock)
        .await;
}

#[tokio::test]
async fn test_initiate_persists_state_and_builds_url() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    let (url, oauth_state) = state.oauth.initiate(None).await.expect("initiate");

    assert!(url.as_str().contains("access_type=offline"));
    assert!(url.as_str().contains("prompt=consent"));
    assert!(url.as_str().contains(&format!("state={}", oauth_state)));

    // The state row is consumable exactly once
    let states = OAuthStateRepository::new(Arc::new(db));
    let consumed = states.consume(&oauth_state).await.expect("consume");
    assert!(consumed.is_some());
    let again = states.consume(&oauth_state).await.expect("consume again");
    assert!(again.is_none());
}

#[tokio::test]
async fn test_callback_happy_path_creates_user_with_tokens() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    mount_token_and_userinfo(&mock).await;

    let (_, oauth_state) = state.oauth.initiate(None).await.expect("initiate");

    let user = state
        .oauth
        .callback(
            &oauth_state,
            Some(&oauth_state),
            "auth-code-1",
            &CancellationToken::new(),
        )
        .await
        .expect("callback succeeds");

    assert_eq!(user.email, "new-user@example.com");
    assert_eq!(user.google_id.as_deref(), Some("google-subject-1"));
    assert_eq!(user.display_name.as_deref(), Some("New User"));

    let tokens = state
        .tokens
        .load(user.id)
        .await
        .expect("load")
        .expect("tokens stored");
    assert_eq!(tokens.access_token, "exchanged-access");
    assert_eq!(tokens.refresh_token.as_deref(), Some("exchanged-refresh"));
}

#[tokio::test]
async fn test_callback_upserts_existing_user_by_google_id() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    mount_token_and_userinfo(&mock).await;

    let (_, first_state) = state.oauth.initiate(None).await.expect("initiate");
    let first_user = state
        .oauth
        .callback(
            &first_state,
            Some(&first_state),
            "code-1",
            &CancellationToken::new(),
        )
        .await
        .expect("first login");

    let (_, second_state) = state.oauth.initiate(None).await.expect("initiate");
    let second_user = state
        .oauth
        .callback(
            &second_state,
            Some(&second_state),
            "code-2",
            &CancellationToken::new(),
        )
        .await
        .expect("second login");

    // Same Google subject resolves to the same local user
    assert_eq!(first_user.id, second_user.id);
}

#[tokio::test]
async fn test_callback_rejects_cookie_mismatch() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    let (_, oauth_state) = state.oauth.initiate(None).await.expect("initiate");

    let err = state
        .oauth
        .callback(
            &oauth_state,
            Some("a-different-state"),
            "code",
            &CancellationToken::new(),
        )
        .await
        .expect_err("mismatch rejected");
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = state
        .oauth
        .callback(&oauth_state, None, "code", &CancellationToken::new())
        .await
        .expect_err("missing cookie rejected");
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_callback_rejects_unknown_state() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    let err = state
        .oauth
        .callback(
            "never-issued",
            Some("never-issued"),
            "code",
            &CancellationToken::new(),
        )
        .await
        .expect_err("unknown state rejected");
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_callback_state_is_one_shot() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    mount_token_and_userinfo(&mock).await;

    let (_, oauth_state) = state.oauth.initiate(None).await.expect("initiate");

    state
        .oauth
        .callback(
            &oauth_state,
            Some(&oauth_state),
            "code-1",
            &CancellationToken::new(),
        )
        .await
        .expect("first callback");

    // Replaying the same state must fail
    let err = state
        .oauth
        .callback(
            &oauth_state,
            Some(&oauth_state),
            "code-1",
            &CancellationToken::new(),
        )
        .await
        .expect_err("replay rejected");
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_callback_exchange_failure_is_unauthenticated() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
        })))
        .mount(&mock)
        .await;

    let (_, oauth_state) = state.oauth.initiate(None).await.expect("initiate");

    let err = state
        .oauth
        .callback(
            &oauth_state,
            Some(&oauth_state),
            "bad-code",
            &CancellationToken::new(),
        )
        .await
        .expect_err("exchange failure surfaces");
    assert_eq!(err.kind, ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn test_expired_state_rejected() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());

    // Persist a state that is already past its expiry
    let states = OAuthStateRepository::new(Arc::new(db.clone()));
    states
        .create("expired-state", None, -1)
        .await
        .expect("create expired state");

    let err = state
        .oauth
        .callback(
            "expired-state",
            Some("expired-state"),
            "code",
            &CancellationToken::new(),
        )
        .await
        .expect_err("expired state rejected");
    assert_eq!(err.kind, ErrorKind::Validation);

    // The sweeper removes it
    let removed = states.cleanup_expired().await.expect("cleanup");
    assert_eq!(removed, 1);
}
