//! # Sync State Repository
//!
//! Cursor lifecycle for the sync engine. The `sync_in_progress` flag is
//! the per-user mutual exclusion; it only flips false→true through the
//! guarded update in [`SyncStateRepository::try_begin_sync`].

use chrono::{DateTime, Utc};
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::sync_state::{self, ActiveModel, Entity, Model};

/// Consecutive failures after which a user is skipped by the auto-sync
/// scheduler.
pub const MAX_CONSECUTIVE_ERRORS: i32 = 5;

/// Repository for sync cursor rows
pub struct SyncStateRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncStateRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(user_id).one(&*self.db).await
    }

    /// Fetch the user's cursor row, creating the default row if absent.
    pub async fn ensure(&self, user_id: Uuid) -> Result<Model, sea_orm::DbErr> {
        if let Some(existing) = self.get(user_id).await? {
            return Ok(existing);
        }

        let active = ActiveModel {
            user_id: Set(user_id),
            next_sync_token: Set(None),
            last_synced_at: Set(None),
            full_sync_completed: Set(false),
            sync_in_progress: Set(false),
            sync_started_at: Set(None),
            last_error: Set(None),
            consecutive_errors: Set(0),
            updated_at: Set(Utc::now().into()),
        };

        match active.insert(&*self.db).await {
            Ok(model) => Ok(model),
            // Lost a concurrent insert race; the winner's row serves
            Err(err) => match self.get(user_id).await? {
                Some(existing) => Ok(existing),
                None => Err(err),
            },
        }
    }

    /// Attempt the false→true transition of `sync_in_progress` in a single
    /// guarded UPDATE. Returns false when another sync holds the flag.
    pub async fn try_begin_sync(&self, user_id: Uuid) -> Result<bool, sea_orm::DbErr> {
        self.ensure(user_id).await?;

        let now = Utc::now();
        let result = Entity::update_many()
            .col_expr(sync_state::Column::SyncInProgress, Expr::value(true))
            .col_expr(sync_state::Column::SyncStartedAt, Expr::value(now))
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::UserId.eq(user_id))
            .filter(sync_state::Column::SyncInProgress.eq(false))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Record a successful sync: advance the cursor, clear errors, release
    /// the flag.
    pub async fn complete_sync(
        &self,
        user_id: Uuid,
        next_sync_token: Option<String>,
    ) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now();
        let mut active = ActiveModel {
            user_id: Set(user_id),
            last_synced_at: Set(Some(now.into())),
            full_sync_completed: Set(true),
            sync_in_progress: Set(false),
            sync_started_at: Set(None),
            last_error: Set(None),
            consecutive_errors: Set(0),
            updated_at: Set(now.into()),
            ..Default::default()
        };

        if next_sync_token.is_some() {
            active.next_sync_token = Set(next_sync_token);
        }

        active.update(&*self.db).await?;
        Ok(())
    }

    /// Record a failed sync: release the flag, bump the error counter.
    pub async fn fail_sync(&self, user_id: Uuid, error: &str) -> Result<(), sea_orm::DbErr> {
        let now = Utc::now();
        let result = Entity::update_many()
            .col_expr(sync_state::Column::SyncInProgress, Expr::value(false))
            .col_expr(sync_state::Column::SyncStartedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(sync_state::Column::LastError, Expr::value(error))
            .col_expr(
                sync_state::Column::ConsecutiveErrors,
                Expr::col(sync_state::Column::ConsecutiveErrors).add(1),
            )
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;

        debug_assert!(result.rows_affected <= 1);
        Ok(())
    }

    /// Drop the stored sync token, forcing the next run into full sync.
    pub async fn clear_sync_token(&self, user_id: Uuid) -> Result<(), sea_orm::DbErr> {
        let active = ActiveModel {
            user_id: Set(user_id),
            next_sync_token: Set(None),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };

        active.update(&*self.db).await?;
        Ok(())
    }

    /// Sweep `running` rows older than the cutoff back to idle with an
    /// error marker. Returns the number of rows reset.
    pub async fn reset_stale(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<u64, sea_orm::DbErr> {
        let now = Utc::now();
        let result = Entity::update_many()
            .col_expr(sync_state::Column::SyncInProgress, Expr::value(false))
            .col_expr(sync_state::Column::SyncStartedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(
                sync_state::Column::LastError,
                Expr::value("sync reset by operator sweep: exceeded maximum runtime"),
            )
            .col_expr(
                sync_state::Column::ConsecutiveErrors,
                Expr::col(sync_state::Column::ConsecutiveErrors).add(1),
            )
            .col_expr(sync_state::Column::UpdatedAt, Expr::value(now))
            .filter(sync_state::Column::SyncInProgress.eq(true))
            .filter(sync_state::Column::SyncStartedAt.lt(started_before))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Cursor rows eligible for automatic sync: full sync completed, not
    /// running, under the error threshold, and last synced before the
    /// cutoff (or never).
    pub async fn eligible_for_auto_sync(
        &self,
        synced_before: DateTime<Utc>,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(sync_state::Column::FullSyncCompleted.eq(true))
            .filter(sync_state::Column::SyncInProgress.eq(false))
            .filter(sync_state::Column::ConsecutiveErrors.lt(MAX_CONSECUTIVE_ERRORS))
            .filter(
                sync_state::Column::LastSyncedAt
                    .is_null()
                    .or(sync_state::Column::LastSyncedAt.lt(synced_before)),
            )
            .all(&*self.db)
            .await
    }
}
