//! Runtime configuration for tempo-ap
//!
//! Bootstrap values (database path, port, logging) come from
//! [`tempo_common::config::TomlConfig`]. Everything that may change between
//! runs without a restart of the host lives in the database `settings` table
//! and is loaded here. Missing or unreadable values fall back to built-in
//! defaults, which are written back so the table always reflects what is in
//! effect.

use crate::db::settings::get_or_init;
use crate::error::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tempo_common::events::RepeatMode;
use tempo_common::FadeCurve;
use tracing::info;

pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 4.0;

/// Longest crossfade accepted from settings
pub const MAX_CROSSFADE_SECS: f64 = 12.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// Volume for a fresh session (0.0-1.0)
    pub default_volume: f32,
    pub default_shuffle: bool,
    pub default_repeat: RepeatMode,

    /// 0 disables crossfading
    pub crossfade_seconds: f64,
    pub crossfade_curve: FadeCurve,
    /// Spacing between gain updates during a crossfade
    pub crossfade_step_ms: u64,

    /// Advance to the next queue entry when a track ends
    pub autoplay: bool,
    /// How long to wait for a loaded track to become playable
    pub canplay_timeout_ms: u64,

    pub visualizer_fps: u32,
    pub snapshot_interval_ms: u64,
    pub equalizer_save_debounce_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            default_volume: 0.75,
            default_shuffle: false,
            default_repeat: RepeatMode::None,
            crossfade_seconds: 0.0,
            crossfade_curve: FadeCurve::Linear,
            crossfade_step_ms: 50,
            autoplay: true,
            canplay_timeout_ms: 8000,
            visualizer_fps: 30,
            snapshot_interval_ms: 5000,
            equalizer_save_debounce_ms: 500,
        }
    }
}

impl RuntimeSettings {
    /// Load every setting from the database, writing defaults for missing keys
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let d = Self::default();
        let settings = Self {
            default_volume: get_or_init(pool, "default_volume", d.default_volume).await?,
            default_shuffle: get_or_init(pool, "default_shuffle", d.default_shuffle).await?,
            default_repeat: get_or_init(pool, "default_repeat", d.default_repeat).await?,
            crossfade_seconds: get_or_init(pool, "crossfade_seconds", d.crossfade_seconds).await?,
            crossfade_curve: get_or_init(pool, "crossfade_curve", d.crossfade_curve).await?,
            crossfade_step_ms: get_or_init(pool, "crossfade_step_ms", d.crossfade_step_ms).await?,
            autoplay: get_or_init(pool, "autoplay", d.autoplay).await?,
            canplay_timeout_ms: get_or_init(pool, "canplay_timeout_ms", d.canplay_timeout_ms)
                .await?,
            visualizer_fps: get_or_init(pool, "visualizer_fps", d.visualizer_fps).await?,
            snapshot_interval_ms: get_or_init(pool, "snapshot_interval_ms", d.snapshot_interval_ms)
                .await?,
            equalizer_save_debounce_ms: get_or_init(
                pool,
                "equalizer_save_debounce_ms",
                d.equalizer_save_debounce_ms,
            )
            .await?,
        }
        .clamped();

        info!(
            "Loaded runtime settings (crossfade {:.1}s {}, autoplay {})",
            settings.crossfade_seconds, settings.crossfade_curve, settings.autoplay
        );
        Ok(settings)
    }

    /// Pull out-of-range values back into their valid ranges
    pub fn clamped(mut self) -> Self {
        self.default_volume = if self.default_volume.is_finite() {
            self.default_volume.clamp(0.0, 1.0)
        } else {
            Self::default().default_volume
        };
        self.crossfade_seconds = if self.crossfade_seconds.is_finite() {
            self.crossfade_seconds.clamp(0.0, MAX_CROSSFADE_SECS)
        } else {
            0.0
        };
        self.crossfade_step_ms = self.crossfade_step_ms.clamp(5, 1000);
        self.canplay_timeout_ms = self.canplay_timeout_ms.max(1);
        self.visualizer_fps = self.visualizer_fps.clamp(1, 120);
        self.snapshot_interval_ms = self.snapshot_interval_ms.max(100);
        self
    }

    pub fn crossfade_enabled(&self) -> bool {
        self.crossfade_seconds > 0.0
    }

    pub fn crossfade_step(&self) -> Duration {
        Duration::from_millis(self.crossfade_step_ms)
    }

    pub fn canplay_timeout(&self) -> Duration {
        Duration::from_millis(self.canplay_timeout_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn equalizer_save_debounce(&self) -> Duration {
        Duration::from_millis(self.equalizer_save_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::{create_schema, init_database};
    use crate::db::settings::{get_setting, set_setting};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_database_gives_defaults() {
        let pool = memory_pool().await;
        init_database(&pool).await.unwrap();
        let settings = RuntimeSettings::load(&pool).await.unwrap();
        assert_eq!(settings, RuntimeSettings::default());
        assert!(!settings.crossfade_enabled());
    }

    #[tokio::test]
    async fn missing_keys_are_written_back() {
        let pool = memory_pool().await;
        create_schema(&pool).await.unwrap();
        RuntimeSettings::load(&pool).await.unwrap();

        let curve: Option<String> = get_setting(&pool, "crossfade_curve").await.unwrap();
        assert_eq!(curve.as_deref(), Some("linear"));
        let timeout: Option<u64> = get_setting(&pool, "canplay_timeout_ms").await.unwrap();
        assert_eq!(timeout, Some(8000));
    }

    #[tokio::test]
    async fn stored_values_are_parsed_and_clamped() {
        let pool = memory_pool().await;
        init_database(&pool).await.unwrap();
        set_setting(&pool, "crossfade_seconds", 30.0).await.unwrap();
        set_setting(&pool, "crossfade_curve", "s_curve").await.unwrap();
        set_setting(&pool, "default_volume", 1.7).await.unwrap();
        set_setting(&pool, "default_repeat", "all").await.unwrap();
        set_setting(&pool, "visualizer_fps", 0).await.unwrap();

        let settings = RuntimeSettings::load(&pool).await.unwrap();
        assert_eq!(settings.crossfade_seconds, MAX_CROSSFADE_SECS);
        assert_eq!(settings.crossfade_curve, FadeCurve::SCurve);
        assert_eq!(settings.default_volume, 1.0);
        assert_eq!(settings.default_repeat, RepeatMode::All);
        assert_eq!(settings.visualizer_fps, 1);
    }
}
