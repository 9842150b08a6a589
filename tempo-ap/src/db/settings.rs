//! Settings table access
//!
//! Every runtime setting is a string row in the `settings` table, parsed on
//! read with `FromStr`.

use crate::error::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

/// Read and parse a setting. Missing rows and NULL values are `None`.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Insert or update a setting
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

pub async fn delete_setting(db: &Pool<Sqlite>, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(db)
        .await?;
    Ok(())
}

/// Read a setting, writing `default` back when it is missing or unparseable
pub async fn get_or_init<T>(db: &Pool<Sqlite>, key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
{
    match get_setting::<T>(db, key).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => {
            set_setting(db, key, &default).await?;
            Ok(default)
        }
        Err(Error::Config(msg)) => {
            warn!("{}; resetting to {}", msg, default);
            set_setting(db, key, &default).await?;
            Ok(default)
        }
        Err(e) => Err(e),
    }
}
