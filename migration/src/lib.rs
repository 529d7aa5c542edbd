//! Database migrations for the calendar sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_users;
mod m2025_06_01_000002_create_events;
mod m2025_06_01_000003_create_sync_states;
mod m2025_06_01_000004_create_oauth_states;
mod m2025_06_01_000005_create_webhook_subscriptions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_users::Migration),
            Box::new(m2025_06_01_000002_create_events::Migration),
            Box::new(m2025_06_01_000003_create_sync_states::Migration),
            Box::new(m2025_06_01_000004_create_oauth_states::Migration),
            Box::new(m2025_06_01_000005_create_webhook_subscriptions::Migration),
        ]
    }
}
