//! # Server Configuration
//!
//! Application state construction, router assembly, and the serve loop
//! with graceful shutdown.

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::crypto::VaultKey;
use crate::google::GoogleClient;
use crate::handlers;
use crate::oauth::OAuthOrchestrator;
use crate::repositories::{EventRepository, SyncStateRepository, UserRepository};
use crate::retry::RetryPolicy;
use crate::sync::SyncEngine;
use crate::tokens::TokenManager;
use crate::webhooks::WebhookService;
use crate::writes::WriteThrough;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub users: Arc<UserRepository>,
    pub events: Arc<EventRepository>,
    pub sync_states: Arc<SyncStateRepository>,
    pub tokens: Arc<TokenManager>,
    pub oauth: Arc<OAuthOrchestrator>,
    pub sync_engine: Arc<SyncEngine>,
    pub writes: Arc<WriteThrough>,
    pub webhooks: Arc<WebhookService>,
}

impl AppState {
    /// Wire up every service against the given database pool.
    pub fn build(config: Arc<AppConfig>, db: DatabaseConnection) -> Self {
        let google = Arc::new(GoogleClient::new(&config));
        Self::build_with_google(config, db, google)
    }

    /// Same wiring with an injected Google client (tests point it at a
    /// mock server).
    pub fn build_with_google(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        google: Arc<GoogleClient>,
    ) -> Self {
        let shared_db = Arc::new(db.clone());
        let retry_policy = RetryPolicy::from_config(&config.retry);
        let vault_key = VaultKey::derive(&config.encryption_secret);

        let tokens = Arc::new(TokenManager::new(
            shared_db.clone(),
            vault_key,
            google.clone(),
            retry_policy.clone(),
        ));
        let oauth = Arc::new(OAuthOrchestrator::new(
            shared_db.clone(),
            google.clone(),
            tokens.clone(),
            retry_policy.clone(),
        ));
        let sync_engine = Arc::new(SyncEngine::new(
            shared_db.clone(),
            tokens.clone(),
            google.clone(),
            retry_policy.clone(),
        ));
        let writes = Arc::new(WriteThrough::new(
            shared_db.clone(),
            tokens.clone(),
            google.clone(),
            retry_policy.clone(),
        ));
        let webhooks = Arc::new(WebhookService::new(
            shared_db.clone(),
            tokens.clone(),
            google,
            sync_engine.clone(),
            retry_policy,
            config.public_base_url.clone(),
        ));

        Self {
            users: Arc::new(UserRepository::new(shared_db.clone())),
            events: Arc::new(EventRepository::new(shared_db.clone())),
            sync_states: Arc::new(SyncStateRepository::new(shared_db)),
            config,
            db,
            tokens,
            oauth,
            sync_engine,
            writes,
            webhooks,
        }
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let cors = build_cors(&state.config);

    let api = Router::new()
        .route("/auth/google", get(handlers::auth::google_login))
        .route("/auth/google/callback", get(handlers::auth::google_callback))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/status", get(handlers::auth::status))
        .route(
            "/calendar/events",
            get(handlers::events::list_events).post(handlers::events::create_event),
        )
        .route(
            "/calendar/events/range/{range}",
            get(handlers::events::list_events_in_range),
        )
        .route(
            "/calendar/events/{id}",
            get(handlers::events::get_event)
                .put(handlers::events::update_event)
                .delete(handlers::events::delete_event),
        )
        .route("/calendar/search", get(handlers::events::search_events))
        .route("/calendar/sync", post(handlers::sync::run_sync))
        .route("/calendar/batch-sync", post(handlers::sync::batch_sync))
        .route("/calendar/sync/status", get(handlers::sync::sync_status))
        .route(
            "/calendar/watch",
            post(handlers::sync::watch).delete(handlers::sync::unwatch),
        )
        .route("/calendar/webhook", post(handlers::webhook::receive_notification));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

fn build_cors(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = config
        .bind_addr()
        .map_err(|e| format!("invalid server address: {}", e))?;
    let profile = config.profile.clone();

    let state = AppState::build(Arc::new(config), db);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::auth::google_login,
        crate::handlers::auth::google_callback,
        crate::handlers::auth::refresh,
        crate::handlers::auth::logout,
        crate::handlers::auth::me,
        crate::handlers::auth::status,
        crate::handlers::events::list_events,
        crate::handlers::events::list_events_in_range,
        crate::handlers::events::get_event,
        crate::handlers::events::create_event,
        crate::handlers::events::update_event,
        crate::handlers::events::delete_event,
        crate::handlers::events::search_events,
        crate::handlers::sync::run_sync,
        crate::handlers::sync::batch_sync,
        crate::handlers::sync::sync_status,
        crate::handlers::sync::watch,
        crate::handlers::sync::unwatch,
        crate::handlers::webhook::receive_notification,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::UserProfile,
            crate::models::event::EventResponse,
            crate::models::event::Attendee,
        )
    ),
    info(
        title = "Calendar Sync API",
        description = "Managed replica of a Google Calendar with write-through mutations",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
