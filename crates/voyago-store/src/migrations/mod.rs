//! Database migration runner.
//!
//! Migrations are executed in order on every [`Database::connect`] /
//! [`Database::from_pool`] call.  Applied versions are recorded in a
//! `schema_version` table so each migration runs exactly once per database.
//!
//! [`Database::connect`]: crate::database::Database::connect
//! [`Database::from_pool`]: crate::database::Database::from_pool

pub mod v001_initial;

use sqlx::PgPool;

use crate::error::{Result, StoreError};

/// Current schema version.  Bump this and add a new migration module
/// whenever the schema changes.
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations against the pool.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
             version    INTEGER NOT NULL,
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
         )",
    )
    .execute(pool)
    .await?;

    let current: i32 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await?;

    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001_initial");
        v001_initial::up(pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        record_version(pool, 1).await?;
    }

    // Future migrations would be added here:
    // if current < 2 {
    //     v002_xxx::up(pool).await?;
    //     record_version(pool, 2).await?;
    // }

    Ok(())
}

async fn record_version(pool: &PgPool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}
