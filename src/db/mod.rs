//! PostgreSQL access: pool setup, schema migrations and the row-level stores.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod job_store;
pub mod sync_logs;

/// Open a pool sized for one process. The API and each worker pass their own
/// `max_connections`; a worker only ever holds one connection at a time.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    tracing::debug!(max_connections, "Database pool ready");
    Ok(pool)
}

/// Apply `migrations/` to the connected database.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
