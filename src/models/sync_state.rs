//! Sync state entity model
//!
//! Per-user sync cursor row. At most one per user; `sync_in_progress`
//! provides the per-user mutual exclusion for the sync engine.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_states")]
pub struct Model {
    /// Owning user (primary key; one cursor per user)
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,

    /// Opaque upstream sync token for the next incremental sync
    pub next_sync_token: Option<String>,

    /// Instant of the last successful sync
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    /// Whether a full sync has ever completed for this user
    pub full_sync_completed: bool,

    /// Whether a sync is currently running
    pub sync_in_progress: bool,

    /// When the running sync started (used by the stale-sync sweeper)
    pub sync_started_at: Option<DateTimeWithTimeZone>,

    /// Message of the most recent failure
    pub last_error: Option<String>,

    /// Consecutive failures; >= 5 disqualifies the user from auto-sync
    pub consecutive_errors: i32,

    /// Timestamp when the row was last updated
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

/// API representation of a user's sync status
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncStatusResponse {
    /// Instant of the last successful sync (RFC 3339)
    pub last_synced_at: Option<String>,
    /// Whether a full sync has completed
    pub full_sync_completed: bool,
    /// Whether a sync is currently running
    pub sync_in_progress: bool,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// Consecutive failures
    pub consecutive_errors: i32,
}

impl From<Model> for SyncStatusResponse {
    fn from(model: Model) -> Self {
        Self {
            last_synced_at: model.last_synced_at.map(|at| at.to_rfc3339()),
            full_sync_completed: model.full_sync_completed,
            sync_in_progress: model.sync_in_progress,
            last_error: model.last_error,
            consecutive_errors: model.consecutive_errors,
        }
    }
}
