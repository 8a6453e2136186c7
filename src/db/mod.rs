//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! The binary uses this module to create the shared SQLx pool and enforce
//! the schema (users, sessions, favorite comics and the change-notify
//! trigger) before any store or session call runs.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}
