//! Database connection management.
//!
//! The [`Database`] struct owns a [`sqlx::PgPool`] and guarantees that
//! migrations are run before any other operation.  The pool is cheap to
//! clone and is also handed to the realtime fan-out adapter, which uses the
//! same database as its pub/sub relay.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;
use crate::migrations;

/// Default connection pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Wrapper around a [`sqlx::PgPool`].
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database at `url` and run any pending migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(url)
            .await?;

        tracing::info!("database pool connected");

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running any pending migrations.
    ///
    /// Useful for tests and for callers that configure their own pool.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a reference to the underlying pool.
    ///
    /// Callers should prefer the typed query helpers, but direct access is
    /// occasionally needed for transactions or ad-hoc queries.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
