//! Session snapshot storage

use crate::db::settings::{delete_setting, get_setting, set_setting};
use crate::error::Result;
use crate::playback::PlaybackSnapshot;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Mutex;
use tracing::warn;

pub const SNAPSHOT_KEY: &str = "session_snapshot";

/// Somewhere a snapshot of the playback session can be kept between runs
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &PlaybackSnapshot) -> Result<()>;
    async fn load(&self) -> Result<Option<PlaybackSnapshot>>;
    async fn clear(&self) -> Result<()>;
}

/// Stores the snapshot as JSON in the settings table
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: &PlaybackSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        set_setting(&self.pool, SNAPSHOT_KEY, json).await
    }

    async fn load(&self) -> Result<Option<PlaybackSnapshot>> {
        let Some(json) = get_setting::<String>(&self.pool, SNAPSHOT_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!("Discarding unreadable session snapshot: {}", e);
                Ok(None)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        delete_setting(&self.pool, SNAPSHOT_KEY).await
    }
}

/// In-process store, used when running without a database and in tests
#[derive(Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<PlaybackSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &PlaybackSnapshot) -> Result<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<PlaybackSnapshot>> {
        Ok(self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TrackId;
    use crate::db::init::create_schema;
    use crate::playback::PlaybackState;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempo_common::events::RepeatMode;

    fn sample() -> PlaybackSnapshot {
        let a = TrackId::new();
        let b = TrackId::new();
        let state = PlaybackState {
            current_track_id: Some(b),
            queue: vec![a, b],
            queue_index: Some(1),
            shuffle: true,
            repeat: RepeatMode::All,
            volume: 0.4,
            speed: 1.25,
            is_playing: true,
            current_playlist_id: None,
        };
        PlaybackSnapshot::new(state, 42.5)
    }

    #[tokio::test]
    async fn sqlite_store_round_trips() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        let store = SqliteSnapshotStore::new(pool);

        assert!(store.load().await.unwrap().is_none());
        let snapshot = sample();
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snapshot));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_keeps_latest() {
        let store = MemorySnapshotStore::new();
        let first = sample();
        let mut second = sample();
        second.position_secs = 3.0;
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        assert_eq!(store.load().await.unwrap().unwrap().position_secs, 3.0);
    }
}
