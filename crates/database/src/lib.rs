//! `PostgreSQL` persistence for the check selection engine.
//!
//! The engine only reads: store and template definitions, coverage rows,
//! responses, runs and local prior stats. [`record_response`] is the single
//! write path, used by the check-taking side and by tooling.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub mod history;
pub mod responses;
pub mod rows;

pub use history::PgHistorySource;
pub use responses::{NewResponse, record_response};

/// Creates a connection pool to the `PostgreSQL` database.
///
/// # Errors
///
/// Returns an error if the connection to the database fails.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Runs all pending migrations.
///
/// # Errors
///
/// Returns an error if running migrations fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
