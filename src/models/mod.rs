//! # Data Models
//!
//! This module contains all the data models used throughout the calendar
//! sync service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod event;
pub mod oauth_state;
pub mod sync_state;
pub mod user;
pub mod webhook_subscription;

pub use event::{Attendee, Entity as Event, EventResponse, EventSource, EventStatus};
pub use oauth_state::Entity as OAuthState;
pub use sync_state::Entity as SyncState;
pub use user::{Entity as User, UserProfile};
pub use webhook_subscription::Entity as WebhookSubscription;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "calsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
