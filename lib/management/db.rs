use std::path::Path;

use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tokio::fs;

use crate::LabdockResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the labdock state database.
pub static CORE_DB_MIGRATOR: Migrator = sqlx::migrate!("lib/management/migrations");

/// Maximum number of concurrent connections per pool.
const MAX_POOL_CONNECTIONS: u32 = 5;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes a new SQLite database if it doesn't already exist at the
/// specified path and runs all pending migrations.
pub async fn init_db(db_path: impl AsRef<Path>, migrator: &Migrator) -> LabdockResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    // Create an empty database file if it doesn't exist
    if !db_path.exists() {
        fs::File::create(&db_path).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await?;

    migrator.run(&pool).await?;

    Ok(pool)
}

/// Creates a connection pool for an existing labdock database.
pub async fn get_db_pool(db_path: impl AsRef<Path>) -> LabdockResult<Pool<Sqlite>> {
    let db_path = db_path.as_ref();
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await?;

    Ok(pool)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
