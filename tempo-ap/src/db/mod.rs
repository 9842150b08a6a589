//! Database access
//!
//! A single SQLite file holds the key/value settings table. Equalizer
//! settings and session snapshots are stored as JSON values under their own
//! keys.

pub mod equalizer;
pub mod init;
pub mod settings;
pub mod snapshot;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database at `path` and initialize it
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    info!("Database opened at {}", path.display());

    init::init_database(&pool).await?;
    Ok(pool)
}
