//! HTTP-level smoke tests: router wiring, envelopes, session extraction,
//! and the always-200 webhook contract.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use calsync::auth;
use calsync::server::create_app;
use tower::ServiceExt;
use wiremock::MockServer;

#[path = "test_utils/mod.rs"]
mod test_utils;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_healthz_ok() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let app = create_app(test_utils::build_state(db, &mock.uri()));

    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_root_reports_service_info() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let app = create_app(test_utils::build_state(db, &mock.uri()));

    let response = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["service"], "calsync");
}

#[tokio::test]
async fn test_protected_endpoint_requires_session() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let app = create_app(test_utils::build_state(db, &mock.uri()));

    let response = app
        .oneshot(
            Request::get("/api/v1/calendar/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["type"], "unauthenticated");
    assert_eq!(json["error"]["status"], 401);
}

#[tokio::test]
async fn test_event_list_with_session_cookie() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    let token = auth::issue_session_token(&state.config, &user).expect("token");
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::get("/api/v1/calendar/events?limit=10")
                .header(header::COOKIE, format!("auth_token={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["pagination"]["total"], 0);
    assert_eq!(json["data"]["pagination"]["has_next"], false);
}

#[tokio::test]
async fn test_auth_status_unauthenticated() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let app = create_app(test_utils::build_state(db, &mock.uri()));

    let response = app
        .oneshot(
            Request::get("/api/v1/auth/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["authenticated"], false);
}

#[tokio::test]
async fn test_auth_me_returns_profile() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    let token = auth::issue_session_token(&state.config, &user).expect("token");
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::get("/api/v1/auth/me")
                .header(header::COOKIE, format!("auth_token={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["email"], user.email);
    // Credential material never leaves the service
    assert!(json["data"].get("access_token_ciphertext").is_none());
}

#[tokio::test]
async fn test_login_redirects_with_state_cookie() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let app = create_app(test_utils::build_state(db, &mock.uri()));

    let response = app
        .oneshot(
            Request::get("/api/v1/auth/google")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("state cookie set")
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with("oauth_state="));

    let location = response
        .headers()
        .get(header::LOCATION)
        .expect("redirect target")
        .to_str()
        .unwrap();
    assert!(location.contains("access_type=offline"));
}

#[tokio::test]
async fn test_webhook_always_returns_200() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let app = create_app(test_utils::build_state(db, &mock.uri()));

    // No channel headers at all: still 200
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/v1/calendar/webhook")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Unresolvable channel: still 200
    let response = app
        .oneshot(
            Request::post("/api/v1/calendar/webhook")
                .header("x-goog-resource-state", "exists")
                .header("x-goog-resource-id", "unknown")
                .header("x-goog-channel-id", "chan")
                .header("x-goog-channel-token", "tok")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_search_requires_two_characters() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    let token = auth::issue_session_token(&state.config, &user).expect("token");
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::get("/api/v1/calendar/search?q=x")
                .header(header::COOKIE, format!("auth_token={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "validation");
}

#[tokio::test]
async fn test_unknown_range_rejected() {
    let db = test_utils::setup_test_db().await;
    let mock = MockServer::start().await;
    let state = test_utils::build_state(db.clone(), &mock.uri());
    let user = test_utils::insert_authed_user(&db).await;

    let token = auth::issue_session_token(&state.config, &user).expect("token");
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::get("/api/v1/calendar/events/range/fortnight")
                .header(header::COOKIE, format!("auth_token={}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
