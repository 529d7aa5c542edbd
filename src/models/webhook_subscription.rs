//! Webhook subscription entity model
//!
//! One row per Google push channel. The demultiplexer resolves inbound
//! notifications to a user through `(token, resource_id)` on active rows.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_subscriptions")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Channel identifier sent to Google at watch time (unique)
    pub channel_id: String,

    /// Upstream resource identifier returned by the watch call
    pub resource_id: String,

    /// Verification token echoed back in notifications
    pub token: String,

    /// Upstream resource URI
    pub resource_uri: Option<String>,

    /// Channel expiry instant
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Whether the channel is live
    pub active: bool,

    /// Timestamp when the subscription was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the subscription was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
