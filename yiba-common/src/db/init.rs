//! Database bootstrap
//!
//! Opens (creating if missing) the SQLite database under the resolved data
//! directory and brings the schema up to date via the migration framework.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::migrations::run_migrations;
use crate::Result;

/// Open the database file, creating it when missing, and run migrations
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    info!("Database ready at {}", db_path.display());
    Ok(pool)
}

/// In-memory database for tests; schema is fully migrated.
///
/// A single connection keeps the memory database alive for the pool's
/// lifetime.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}
