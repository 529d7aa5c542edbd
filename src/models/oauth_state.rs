//! # OAuth State Model
//!
//! Short-lived CSRF nonce rows for the authorization-code flow. Rows are
//! consumed one-shot at callback time or swept once expired.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Opaque state token (unique)
    pub state: String,

    /// User re-linking an existing account, if known at initiation
    pub user_id: Option<Uuid>,

    /// Absolute expiry instant
    pub expires_at: DateTimeWithTimeZone,

    /// When the state was created
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
