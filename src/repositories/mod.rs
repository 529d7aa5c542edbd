//! # Repositories
//!
//! Database access layers for the calendar sync service. Each repository
//! owns the queries for one entity; mutations that must participate in a
//! caller-controlled transaction accept a generic [`sea_orm::ConnectionTrait`].

pub mod event;
pub mod oauth_state;
pub mod sync_state;
pub mod user;
pub mod webhook_subscription;

pub use event::{EventFilter, EventPatch, EventRepository, NewEvent, SourceFilter, UpsertOutcome};
pub use oauth_state::OAuthStateRepository;
pub use sync_state::SyncStateRepository;
pub use user::UserRepository;
pub use webhook_subscription::WebhookSubscriptionRepository;
