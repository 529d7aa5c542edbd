//! # Calendar Sync Service Entry Point

use std::sync::Arc;

use calsync::{
    config::ConfigLoader, db, scheduler::Scheduler, server::AppState, server::run_server,
    sync::SyncEngine, telemetry,
};
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "calsync")]
#[command(about = "Calendar sync service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Run only the background scheduler
    Scheduler,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    let db = db::init_pool(&config).await?;

    if let Some(command) = cli.command {
        match command {
            Commands::Migrate { action } => {
                handle_migrate_command(&db, action).await?;
                return Ok(());
            }
            Commands::Scheduler => {
                run_migrations_for_dev_profiles(&config, &db).await?;

                let shutdown = shutdown_token();
                let state = AppState::build(Arc::new(config), db.clone());
                let sync_engine: Arc<SyncEngine> = state.sync_engine.clone();
                let scheduler = Scheduler::new(
                    state.config.clone(),
                    Arc::new(db),
                    sync_engine,
                    state.webhooks.clone(),
                );
                scheduler.run(shutdown).await?;
                return Ok(());
            }
        }
    }

    run_migrations_for_dev_profiles(&config, &db).await?;

    if let Ok(redacted_json) = config.redacted_json() {
        tracing::info!(profile = %config.profile, configuration = %redacted_json, "configuration loaded");
    }

    let shutdown = shutdown_token();

    // The sweeper runs alongside the API server and stops with it
    let scheduler_state = AppState::build(Arc::new(config.clone()), db.clone());
    let scheduler = Scheduler::new(
        scheduler_state.config.clone(),
        Arc::new(db.clone()),
        scheduler_state.sync_engine.clone(),
        scheduler_state.webhooks.clone(),
    );
    let scheduler_shutdown = shutdown.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    let result = run_server(config, db, shutdown.clone()).await;

    shutdown.cancel();
    let _ = scheduler_handle.await;

    result
}

/// Ctrl+C flips a shared cancellation token.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    token
}

async fn run_migrations_for_dev_profiles(
    config: &calsync::config::AppConfig,
    db: &DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if config.profile == "local" || config.profile == "test" {
        tracing::info!(profile = %config.profile, "running migrations automatically");
        Migrator::up(db, None).await?;
    }
    Ok(())
}

async fn handle_migrate_command(
    db: &DatabaseConnection,
    action: MigrateAction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match action {
        MigrateAction::Up => {
            println!("Applying migrations...");
            Migrator::up(db, None).await?;
            println!("All migrations applied successfully");
        }
        MigrateAction::Down => {
            println!("Rolling back last migration...");
            Migrator::down(db, Some(1)).await?;
            println!("Migration rolled back successfully");
        }
        MigrateAction::Status => {
            let applied = Migrator::get_applied_migrations(db).await?;
            let pending = Migrator::get_pending_migrations(db).await?;
            println!("Applied migrations: {}", applied.len());
            println!("Pending migrations: {}", pending.len());
        }
    }
    Ok(())
}
