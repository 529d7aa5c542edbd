//! User entity model
//!
//! This module contains the SeaORM entity model for the users table, which
//! stores the Google account linkage and wrapped OAuth credentials.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// User entity representing a principal with an upstream Google account
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Google subject identifier (unique when present)
    pub google_id: Option<String>,

    /// Email address (unique)
    pub email: String,

    /// Display name from the Google profile
    pub display_name: Option<String>,

    /// Profile picture URL
    pub picture_url: Option<String>,

    /// Wrapped access token (vault ciphertext)
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// Wrapped refresh token (vault ciphertext)
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Access token expiry instant
    pub token_expires_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the user was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the user was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::event::Entity")]
    Events,
    #[sea_orm(has_one = "super::sync_state::Entity")]
    SyncState,
    #[sea_orm(has_many = "super::webhook_subscription::Entity")]
    WebhookSubscriptions,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl Related<super::sync_state::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncState.def()
    }
}

impl Related<super::webhook_subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WebhookSubscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Public user profile, stripped of credential material
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    /// User ID
    pub id: Uuid,
    /// Email address
    pub email: String,
    /// Display name
    pub display_name: Option<String>,
    /// Profile picture URL
    pub picture_url: Option<String>,
    /// Account creation timestamp (RFC 3339)
    pub created_at: String,
}

impl From<Model> for UserProfile {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            display_name: model.display_name,
            picture_url: model.picture_url,
            created_at: model.created_at.to_rfc3339(),
        }
    }
}
