//! # User Repository
//!
//! Database operations for user rows: profile upserts from the OAuth flow
//! and credential column management for the token manager.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::user::{self, ActiveModel, Entity, Model};

/// Profile fields ingested from the Google userinfo endpoint.
#[derive(Debug, Clone)]
pub struct ProfileFields {
    pub google_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
}

/// Repository for user database operations
pub struct UserRepository {
    db: Arc<DatabaseConnection>,
}

impl UserRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(id).one(&*self.db).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&*self.db)
            .await
    }

    pub async fn find_by_google_id(
        &self,
        google_id: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(user::Column::GoogleId.eq(google_id))
            .one(&*self.db)
            .await
    }

    /// Create or update a user from an OAuth profile.
    ///
    /// Lookup is by Google subject id first, then by email (an account that
    /// existed before its Google linkage). Profile fields are refreshed on
    /// every authorization.
    pub async fn upsert_from_profile(
        &self,
        profile: &ProfileFields,
    ) -> Result<Model, sea_orm::DbErr> {
        let now: DateTimeWithTimeZone = Utc::now().into();

        let existing = match self.find_by_google_id(&profile.google_id).await? {
            Some(user) => Some(user),
            None => self.find_by_email(&profile.email).await?,
        };

        match existing {
            Some(user) => {
                let mut active: ActiveModel = user.into();
                active.google_id = Set(Some(profile.google_id.clone()));
                active.email = Set(profile.email.clone());
                active.display_name = Set(profile.display_name.clone());
                active.picture_url = Set(profile.picture_url.clone());
                active.updated_at = Set(now);
                active.update(&*self.db).await
            }
            None => {
                let active = ActiveModel {
                    id: Set(Uuid::new_v4()),
                    google_id: Set(Some(profile.google_id.clone())),
                    email: Set(profile.email.clone()),
                    display_name: Set(profile.display_name.clone()),
                    picture_url: Set(profile.picture_url.clone()),
                    access_token_ciphertext: Set(None),
                    refresh_token_ciphertext: Set(None),
                    token_expires_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                active.insert(&*self.db).await
            }
        }
    }

    /// Persist wrapped credentials for a user.
    ///
    /// A `None` refresh ciphertext leaves the stored refresh token in
    /// place; Google only re-issues refresh tokens on consent.
    pub async fn store_tokens(
        &self,
        user_id: Uuid,
        access_token_ciphertext: Vec<u8>,
        refresh_token_ciphertext: Option<Vec<u8>>,
        token_expires_at: Option<DateTimeWithTimeZone>,
    ) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(user_id),
            access_token_ciphertext: Set(Some(access_token_ciphertext)),
            token_expires_at: Set(token_expires_at),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };

        if let Some(refresh) = refresh_token_ciphertext {
            active.refresh_token_ciphertext = Set(Some(refresh));
        }

        active.update(&*self.db).await?;
        Ok(())
    }

    /// Clear all stored credentials (revocation).
    pub async fn clear_tokens(&self, user_id: Uuid) -> Result<(), sea_orm::DbErr> {
        let active = ActiveModel {
            id: Set(user_id),
            access_token_ciphertext: Set(None),
            refresh_token_ciphertext: Set(None),
            token_expires_at: Set(None),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };

        active.update(&*self.db).await?;
        Ok(())
    }
}
