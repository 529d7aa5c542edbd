//! Google OAuth2 and Calendar API client.
//!
//! Thin typed wrapper over the upstream REST endpoints. Every non-success
//! response is classified into an [`UpstreamError`] so the retry executor
//! and callers can act on the kind rather than raw status codes. Endpoints
//! are overridable for tests.

pub mod types;

use reqwest::Client;
use url::Url;

use crate::config::AppConfig;
use crate::retry::{UpstreamError, classify_http, classify_transport};
use types::{
    CalendarEvent, ChannelResponse, ChannelStopRequest, EventPayload, EventsListResponse,
    GoogleTokenResponse, GoogleUserinfo, WatchRequest,
};

/// OAuth scopes requested during authorization.
pub const OAUTH_SCOPES: &[&str] = &[
    "openid",
    "email",
    "profile",
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/calendar.events",
];

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const CALENDAR_EVENTS_URL: &str =
    "https://www.googleapis.com/calendar/v3/calendars/primary/events";
const CHANNELS_STOP_URL: &str = "https://www.googleapis.com/calendar/v3/channels/stop";

/// Hard cap the Events API accepts per page.
pub const MAX_RESULTS_CAP: u32 = 2500;

/// Query options for `events.list`.
#[derive(Debug, Clone, Default)]
pub struct ListEventsQuery {
    pub time_min: Option<String>,
    pub time_max: Option<String>,
    pub max_results: Option<u32>,
    pub page_token: Option<String>,
    pub sync_token: Option<String>,
    pub single_events: bool,
    pub order_by_start_time: bool,
}

/// Google API client.
#[derive(Clone)]
pub struct GoogleClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http_client: Client,
    auth_url: String,
    token_url: String,
    revoke_url: String,
    userinfo_url: String,
    events_url: String,
    channels_stop_url: String,
}

impl GoogleClient {
    pub fn new(config: &AppConfig) -> Self {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.upstream_timeout_seconds))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_uri: config.google_redirect_uri.clone(),
            http_client,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            revoke_url: GOOGLE_REVOKE_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            events_url: CALENDAR_EVENTS_URL.to_string(),
            channels_stop_url: CHANNELS_STOP_URL.to_string(),
        }
    }

    /// Client with all endpoints rooted at `base_url` (wiremock tests).
    pub fn new_with_base_url(config: &AppConfig, base_url: &str) -> Self {
        let mut client = Self::new(config);
        client.auth_url = format!("{}/o/oauth2/v2/auth", base_url);
        client.token_url = format!("{}/token", base_url);
        client.revoke_url = format!("{}/revoke", base_url);
        client.userinfo_url = format!("{}/oauth2/v2/userinfo", base_url);
        client.events_url = format!("{}/calendar/v3/calendars/primary/events", base_url);
        client.channels_stop_url = format!("{}/calendar/v3/channels/stop", base_url);
        client
    }

    /// Build the user-facing authorization URL for the consent screen.
    pub fn build_authorize_url(&self, state: &str) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| UpstreamError::Invalid(format!("invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &OAUTH_SCOPES.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);

        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<GoogleTokenResponse, UpstreamError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let response = check_status(response).await?;
        response
            .json::<GoogleTokenResponse>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("token response: {}", e)))
    }

    /// Mint a new access token from a refresh token.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<GoogleTokenResponse, UpstreamError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let response = check_status(response).await?;
        response
            .json::<GoogleTokenResponse>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("refresh response: {}", e)))
    }

    /// Revoke a token at the upstream. Callers treat failures as warnings.
    pub async fn revoke_token(&self, token: &str) -> Result<(), UpstreamError> {
        let response = self
            .http_client
            .post(&self.revoke_url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        check_status(response).await.map(|_| ())
    }

    /// Fetch the authenticated user's profile.
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<GoogleUserinfo, UpstreamError> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let response = check_status(response).await?;
        response
            .json::<GoogleUserinfo>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("userinfo response: {}", e)))
    }

    /// One page of `events.list` on the primary calendar.
    pub async fn list_events(
        &self,
        access_token: &str,
        query: &ListEventsQuery,
    ) -> Result<EventsListResponse, UpstreamError> {
        let mut request = self.http_client.get(&self.events_url).bearer_auth(access_token);

        if let Some(sync_token) = &query.sync_token {
            request = request.query(&[("syncToken", sync_token.as_str())]);
        } else {
            if let Some(time_min) = &query.time_min {
                request = request.query(&[("timeMin", time_min.as_str())]);
            }
            if let Some(time_max) = &query.time_max {
                request = request.query(&[("timeMax", time_max.as_str())]);
            }
            if query.order_by_start_time {
                request = request.query(&[("orderBy", "startTime")]);
            }
        }
        if query.single_events {
            request = request.query(&[("singleEvents", "true")]);
        }
        if let Some(max_results) = query.max_results {
            request = request.query(&[("maxResults", max_results.min(MAX_RESULTS_CAP).to_string())]);
        }
        if let Some(page_token) = &query.page_token {
            request = request.query(&[("pageToken", page_token.as_str())]);
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let response = check_status(response).await?;
        response
            .json::<EventsListResponse>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("events.list response: {}", e)))
    }

    /// Create an event on the primary calendar.
    pub async fn insert_event(
        &self,
        access_token: &str,
        payload: &EventPayload,
    ) -> Result<CalendarEvent, UpstreamError> {
        let response = self
            .http_client
            .post(&self.events_url)
            .bearer_auth(access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let response = check_status(response).await?;
        response
            .json::<CalendarEvent>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("events.insert response: {}", e)))
    }

    /// Replace an event; the Events API requires the full representation.
    pub async fn update_event(
        &self,
        access_token: &str,
        event_id: &str,
        payload: &EventPayload,
    ) -> Result<CalendarEvent, UpstreamError> {
        let response = self
            .http_client
            .put(format!("{}/{}", self.events_url, event_id))
            .bearer_auth(access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let response = check_status(response).await?;
        response
            .json::<CalendarEvent>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("events.update response: {}", e)))
    }

    /// Delete an event. 404/410 surface as [`UpstreamError::Gone`].
    pub async fn delete_event(
        &self,
        access_token: &str,
        event_id: &str,
    ) -> Result<(), UpstreamError> {
        let response = self
            .http_client
            .delete(format!("{}/{}", self.events_url, event_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(UpstreamError::Gone("event not found".to_string()));
        }

        check_status(response).await.map(|_| ())
    }

    /// Open a push notification channel on the primary calendar.
    pub async fn watch_events(
        &self,
        access_token: &str,
        watch: &WatchRequest,
    ) -> Result<ChannelResponse, UpstreamError> {
        let response = self
            .http_client
            .post(format!("{}/watch", self.events_url))
            .bearer_auth(access_token)
            .json(watch)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let response = check_status(response).await?;
        response
            .json::<ChannelResponse>()
            .await
            .map_err(|e| UpstreamError::Invalid(format!("events.watch response: {}", e)))
    }

    /// Stop a push notification channel.
    pub async fn stop_channel(
        &self,
        access_token: &str,
        stop: &ChannelStopRequest,
    ) -> Result<(), UpstreamError> {
        let response = self
            .http_client
            .post(&self.channels_stop_url)
            .bearer_auth(access_token)
            .json(stop)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        check_status(response).await.map(|_| ())
    }
}

/// Classify a non-success response, preserving Retry-After when present.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());

    let body = response.text().await.unwrap_or_default();
    Err(classify_http(status.as_u16(), retry_after, &body))
}
