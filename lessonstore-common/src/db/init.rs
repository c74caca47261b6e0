//! Store initialisation
//!
//! Every pass runs against a single SQLite connection: the pool is capped at
//! one connection and never recycles it, so a pass that holds a transaction
//! owns the whole store for its duration.

use crate::db::migrator::{MigrationReport, SchemaMigrator};
use crate::db::schema_sync::SchemaIntrospector;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Store file used when no path is configured
pub const DEFAULT_STORE_FILE: &str = "lessons.db";

/// Tables every pass expects to find
pub const REQUIRED_TABLES: [&str; 4] = ["lessons", "tags", "lesson_tags", "lesson_progress"];

const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open an existing store
///
/// A missing file is [`Error::StoreNotFound`]; no file is created.
pub async fn open_store(db_path: &Path) -> Result<SqlitePool> {
    if !db_path.exists() {
        return Err(Error::StoreNotFound(db_path.to_path_buf()));
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(false);
    let pool = connect(options).await?;

    info!("Opened existing store: {}", db_path.display());
    Ok(pool)
}

/// Create the store if needed and bring it to the declared schema
pub async fn init_store(db_path: &Path) -> Result<(SqlitePool, MigrationReport)> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = connect(options).await?;

    if newly_created {
        info!("Initialized new store: {}", db_path.display());
    } else {
        info!("Opened existing store: {}", db_path.display());
    }

    let report = SchemaMigrator::migrate(&pool).await?;
    Ok((pool, report))
}

/// Empty in-memory store
///
/// Used by tests; the single, never-recycled connection keeps the database
/// alive. Shape it with [`SchemaMigrator::migrate`].
pub async fn open_memory_store() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options.foreign_keys(true))
        .await?;
    Ok(pool)
}

/// Fail with [`Error::StoreInconsistent`] unless all required tables exist
pub async fn ensure_initialized(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.acquire().await?;
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        if !SchemaIntrospector::table_exists(&mut conn, table).await? {
            missing.push(table);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::StoreInconsistent(format!(
            "missing table(s) {}; run `init` or `migrate` first",
            missing.join(", ")
        )))
    }
}

async fn connect(options: SqliteConnectOptions) -> Result<SqlitePool> {
    let options = options
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    Ok(pool)
}
