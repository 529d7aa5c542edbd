//! Shared helpers for integration tests: in-memory database with
//! migrations applied, seeded users/credentials, and app state wired
//! against a mock Google server.

#![allow(dead_code)]

use std::sync::Arc;

use calsync::config::{AppConfig, RetryPolicyConfig};
use calsync::crypto::{self, VaultKey};
use calsync::google::GoogleClient;
use calsync::server::AppState;
use chrono::{DateTime, Duration, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use uuid::Uuid;

pub const TEST_ENCRYPTION_SECRET: &str = "integration-test-encryption-secret";

/// Unique file-backed SQLite with the full schema applied. A file (not
/// `:memory:`) so that every pooled connection sees the same database;
/// transactions and concurrent reads then behave like production.
pub async fn setup_test_db() -> DatabaseConnection {
    let db_path = std::env::temp_dir().join(format!("calsync_test_{}.db", Uuid::new_v4()));
    let mut options = ConnectOptions::new(format!("sqlite:{}?mode=rwc", db_path.display()));
    options.max_connections(5).sqlx_logging(false);

    let db = Database::connect(options)
        .await
        .expect("connect to sqlite test database");

    Migrator::up(&db, None).await.expect("apply migrations");
    db
}

/// Config pointing at the mock upstream, with fast retries.
pub fn test_config(mock_base_url: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        encryption_secret: TEST_ENCRYPTION_SECRET.to_string(),
        jwt_secret: "integration-test-jwt-secret".to_string(),
        google_client_id: "test-client-id".to_string(),
        google_client_secret: "test-client-secret".to_string(),
        google_redirect_uri: format!("{}/callback", mock_base_url),
        public_base_url: "https://calsync.example".to_string(),
        retry: RetryPolicyConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
            multiplier: 2.0,
        },
        ..Default::default()
    }
}

/// Full application state against the mock Google server.
pub fn build_state(db: DatabaseConnection, mock_base_url: &str) -> AppState {
    let config = Arc::new(test_config(mock_base_url));
    let google = Arc::new(GoogleClient::new_with_base_url(&config, mock_base_url));
    AppState::build_with_google(config, db, google)
}

pub fn vault_key() -> VaultKey {
    VaultKey::derive(TEST_ENCRYPTION_SECRET)
}

/// Insert a user row, optionally with wrapped credentials.
pub async fn insert_user(db: &DatabaseConnection) -> calsync::models::user::Model {
    insert_user_with_email(db, &format!("user-{}@example.com", Uuid::new_v4())).await
}

pub async fn insert_user_with_email(
    db: &DatabaseConnection,
    email: &str,
) -> calsync::models::user::Model {
    let now = Utc::now();
    let active = calsync::models::user::ActiveModel {
        id: Set(Uuid::new_v4()),
        google_id: Set(Some(format!("google-{}", Uuid::new_v4()))),
        email: Set(email.to_string()),
        display_name: Set(Some("Test User".to_string())),
        picture_url: Set(None),
        access_token_ciphertext: Set(None),
        refresh_token_ciphertext: Set(None),
        token_expires_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };

    active.insert(db).await.expect("insert user")
}

/// Store wrapped credentials on a user row.
pub async fn seed_tokens(
    db: &DatabaseConnection,
    user_id: Uuid,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) {
    let key = vault_key();
    let active = calsync::models::user::ActiveModel {
        id: Set(user_id),
        access_token_ciphertext: Set(Some(
            crypto::wrap(&key, access_token).expect("wrap access token"),
        )),
        refresh_token_ciphertext: Set(refresh_token
            .map(|token| crypto::wrap(&key, token).expect("wrap refresh token"))),
        token_expires_at: Set(Some(expires_at.into())),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    };

    active.update(db).await.expect("seed tokens");
}

/// A user holding a token valid for another hour.
pub async fn insert_authed_user(db: &DatabaseConnection) -> calsync::models::user::Model {
    let user = insert_user(db).await;
    seed_tokens(
        db,
        user.id,
        "valid-access-token",
        Some("valid-refresh-token"),
        Utc::now() + Duration::hours(1),
    )
    .await;
    user
}

/// Wire body for one upstream calendar event.
pub fn upstream_event(id: &str, summary: &str, updated: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "status": "confirmed",
        "summary": summary,
        "start": {"dateTime": "2025-03-01T10:00:00Z"},
        "end": {"dateTime": "2025-03-01T11:00:00Z"},
        "updated": updated,
    })
}

/// Wire body for a cancelled upstream event.
pub fn cancelled_upstream_event(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "status": "cancelled",
    })
}
