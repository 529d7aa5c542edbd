//! # Webhook Handler
//!
//! Inbound Google channel notifications. Authentication is by channel
//! token resolution, not user session, and the response is HTTP 200
//! regardless of outcome: the upstream retries on non-2xx and a
//! misbehaving channel must not cause a retry flood.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use tracing::warn;

use crate::server::AppState;
use crate::webhooks::Notification;

/// Receive a Google push notification
#[utoipa::path(
    post,
    path = "/api/v1/calendar/webhook",
    responses((status = 200, description = "Always, regardless of outcome")),
    tag = "webhooks"
)]
pub async fn receive_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> StatusCode {
    let notification = parse_headers(&headers);

    if notification.resource_id.is_empty() || notification.channel_token.is_empty() {
        warn!("notification missing channel headers, absorbing");
        return StatusCode::OK;
    }

    if let Err(err) = state.webhooks.handle_notification(&notification).await {
        warn!(error = %err, "webhook processing failed, absorbing");
    }

    StatusCode::OK
}

fn parse_headers(headers: &HeaderMap) -> Notification {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    Notification {
        resource_state: header("x-goog-resource-state"),
        resource_id: header("x-goog-resource-id"),
        resource_uri: Some(header("x-goog-resource-uri")).filter(|uri| !uri.is_empty()),
        channel_id: header("x-goog-channel-id"),
        channel_token: header("x-goog-channel-token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-resource-state", "exists".parse().unwrap());
        headers.insert("x-goog-resource-id", "res-1".parse().unwrap());
        headers.insert("x-goog-channel-id", "chan-1".parse().unwrap());
        headers.insert("x-goog-channel-token", "tok-1".parse().unwrap());

        let notification = parse_headers(&headers);
        assert_eq!(notification.resource_state, "exists");
        assert_eq!(notification.resource_id, "res-1");
        assert_eq!(notification.channel_id, "chan-1");
        assert_eq!(notification.channel_token, "tok-1");
        assert_eq!(notification.resource_uri, None);
    }

    #[test]
    fn test_parse_headers_tolerates_absence() {
        let notification = parse_headers(&HeaderMap::new());
        assert!(notification.resource_id.is_empty());
        assert!(notification.channel_token.is_empty());
    }
}
