//! # Webhook Subscription Repository
//!
//! Database operations for Google push-channel bindings.

use chrono::{DateTime, Utc};
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::webhook_subscription::{self, ActiveModel, Entity, Model};

/// Fields captured from a successful `events.watch` call.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub channel_id: String,
    pub resource_id: String,
    pub token: String,
    pub resource_uri: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Repository for webhook subscription rows
pub struct WebhookSubscriptionRepository {
    db: Arc<DatabaseConnection>,
}

impl WebhookSubscriptionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, sub: NewSubscription) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();
        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(sub.user_id),
            channel_id: Set(sub.channel_id),
            resource_id: Set(sub.resource_id),
            token: Set(sub.token),
            resource_uri: Set(sub.resource_uri),
            expires_at: Set(sub.expires_at.map(Into::into)),
            active: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        active.insert(&*self.db).await
    }

    /// Active subscriptions matching an inbound notification's resource id.
    /// The channel-token comparison happens in the demultiplexer, in
    /// constant time.
    pub async fn find_active_by_resource(
        &self,
        resource_id: &str,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(webhook_subscription::Column::ResourceId.eq(resource_id))
            .filter(webhook_subscription::Column::Active.eq(true))
            .all(&*self.db)
            .await
    }

    pub async fn find_active_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(webhook_subscription::Column::UserId.eq(user_id))
            .filter(webhook_subscription::Column::Active.eq(true))
            .all(&*self.db)
            .await
    }

    /// Deactivate every live channel a user owns; returns the rows touched.
    pub async fn deactivate_for_user(&self, user_id: Uuid) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::update_many()
            .col_expr(webhook_subscription::Column::Active, Expr::value(false))
            .col_expr(
                webhook_subscription::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(webhook_subscription::Column::UserId.eq(user_id))
            .filter(webhook_subscription::Column::Active.eq(true))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Deactivate channels whose upstream expiry has passed. Returns the
    /// owning users, deduplicated, so the sweeper can re-subscribe them.
    pub async fn deactivate_expired(&self) -> Result<Vec<Uuid>, sea_orm::DbErr> {
        let expired = Entity::find()
            .filter(webhook_subscription::Column::Active.eq(true))
            .filter(webhook_subscription::Column::ExpiresAt.is_not_null())
            .filter(webhook_subscription::Column::ExpiresAt.lt(Utc::now()))
            .all(&*self.db)
            .await?;

        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = expired.iter().map(|sub| sub.id).collect();
        Entity::update_many()
            .col_expr(webhook_subscription::Column::Active, Expr::value(false))
            .col_expr(
                webhook_subscription::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(webhook_subscription::Column::Id.is_in(ids))
            .exec(&*self.db)
            .await?;

        let mut user_ids: Vec<Uuid> = expired.into_iter().map(|sub| sub.user_id).collect();
        user_ids.sort_unstable();
        user_ids.dedup();
        Ok(user_ids)
    }
}
