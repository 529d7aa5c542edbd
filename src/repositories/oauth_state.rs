//! # OAuth State Repository
//!
//! Database operations for CSRF state rows used by the authorization-code
//! flow. States are single-use and short-lived.

use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::oauth_state::{self, ActiveModel, Entity, Model};

/// Repository for OAuth state database operations
pub struct OAuthStateRepository {
    db: Arc<DatabaseConnection>,
}

impl OAuthStateRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new state row expiring after `expires_in_minutes`.
    pub async fn create(
        &self,
        state: &str,
        user_id: Option<Uuid>,
        expires_in_minutes: i64,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();
        let expires_at = now + Duration::minutes(expires_in_minutes);

        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            state: Set(state.to_string()),
            user_id: Set(user_id),
            expires_at: Set(expires_at.into()),
            created_at: Set(now.into()),
        };

        active.insert(&*self.db).await
    }

    /// Find an unexpired state and delete it (one-shot consumption).
    pub async fn consume(&self, state: &str) -> Result<Option<Model>, sea_orm::DbErr> {
        let found = Entity::find()
            .filter(oauth_state::Column::State.eq(state))
            .filter(oauth_state::Column::ExpiresAt.gt(Utc::now()))
            .one(&*self.db)
            .await?;

        if let Some(ref model) = found {
            Entity::delete_by_id(model.id).exec(&*self.db).await?;
        }

        Ok(found)
    }

    /// Delete expired state rows; returns the number removed.
    pub async fn cleanup_expired(&self) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lt(Utc::now()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
