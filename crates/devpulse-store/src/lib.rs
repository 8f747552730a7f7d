//! devpulse-store
//!
//! Postgres persistence for the devpulse event pipeline. A single [`Store`]
//! wraps a connection pool; every module here is an `impl Store` block
//! grouped by the entity it owns (workspaces/devices, events, sessions,
//! transcript, git activity).
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod events;
mod git;
mod schema;
mod sessions;
mod transcript;
mod workspaces;

pub use git::GitActivityRow;
pub use transcript::{NewContentBlock, NewTranscriptMessage};

use sqlx::postgres::{PgPool, PgPoolOptions};

/// A handle to the devpulse Postgres database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to `database_url`, apply the schema, and return a ready
    /// handle. Bounded pool size mirrors spec §5's "database access is via
    /// a pool with bounded size."
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool (used by tests that share a pool across
    /// fixtures, and by binaries that want pool options the convenience
    /// constructor doesn't expose).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema. Safe to call on every startup; idempotent.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        schema::migrate(&self.pool).await
    }

    /// Borrow the underlying pool, for callers that need raw access
    /// (e.g. a health check).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Cheapest possible reachability probe.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
