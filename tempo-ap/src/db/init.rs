//! Schema creation and default settings

use crate::error::Result;
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

/// Settings written on first start (key, default)
pub const SETTINGS_DEFAULTS: &[(&str, &str)] = &[
    ("default_volume", "0.75"),
    ("default_shuffle", "false"),
    ("default_repeat", "none"),
    ("crossfade_seconds", "0"),
    ("crossfade_curve", "linear"),
    ("crossfade_step_ms", "50"),
    ("autoplay", "true"),
    ("canplay_timeout_ms", "8000"),
    ("visualizer_fps", "30"),
    ("snapshot_interval_ms", "5000"),
    ("equalizer_save_debounce_ms", "500"),
];

/// Create tables and fill in missing defaults; safe to call repeatedly
pub async fn init_database(pool: &Pool<Sqlite>) -> Result<()> {
    create_schema(pool).await?;
    init_settings_defaults(pool).await
}

pub async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    debug!("Schema ready");
    Ok(())
}

/// Insert every default whose key is missing or NULL
pub async fn init_settings_defaults(pool: &Pool<Sqlite>) -> Result<()> {
    for (key, default_value) in SETTINGS_DEFAULTS {
        let result = sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            WHERE settings.value IS NULL
            "#,
        )
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
    }
    Ok(())
}
