//! Read-only view of the track catalog
//!
//! Track records are owned by an external store; the session only looks
//! tracks up by id and asks for the full available set when it rebuilds the
//! queue.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Stable track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(Uuid);

impl TrackId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TrackId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Immutable track record
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    /// Catalog duration in seconds; 0.0 when unknown until decoded
    pub duration_secs: f64,
    pub file_path: Option<PathBuf>,
    /// Bytes held in memory for tracks without (or in addition to) a path
    pub cached_bytes: Option<Arc<[u8]>>,
}

impl Track {
    pub fn new(title: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            id: TrackId::new(),
            title: title.into(),
            duration_secs,
            file_path: None,
            cached_bytes: None,
        }
    }

    /// Track backed by a file; title is the file stem
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id: TrackId::new(),
            title,
            duration_secs: 0.0,
            file_path: Some(path),
            cached_bytes: None,
        }
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_cached_bytes(mut self, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.cached_bytes = Some(bytes.into());
        self
    }
}

/// Catalog store contract
pub trait Catalog: Send + Sync {
    /// Look up a single track
    fn get_track_by_id(&self, id: TrackId) -> Option<Track>;

    /// Ids of every available track, in catalog order
    fn list_tracks(&self) -> Vec<TrackId>;

    fn is_empty(&self) -> bool {
        self.list_tracks().is_empty()
    }
}

/// Catalog held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tracks: RwLock<Vec<Track>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        Self {
            tracks: RwLock::new(tracks.into_iter().collect()),
        }
    }

    /// Add a track, replacing any record with the same id
    pub fn insert(&self, track: Track) {
        let mut tracks = self.tracks.write().unwrap_or_else(|e| e.into_inner());
        match tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => *existing = track,
            None => tracks.push(track),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Catalog for InMemoryCatalog {
    fn get_track_by_id(&self, id: TrackId) -> Option<Track> {
        self.tracks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    fn list_tracks(&self) -> Vec<TrackId> {
        self.tracks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|t| t.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_order() {
        let a = Track::new("a", 10.0);
        let b = Track::new("b", 20.0);
        let catalog = InMemoryCatalog::from_tracks([a.clone(), b.clone()]);

        assert_eq!(catalog.list_tracks(), vec![a.id, b.id]);
        assert_eq!(catalog.get_track_by_id(b.id).unwrap().title, "b");
        assert!(catalog.get_track_by_id(TrackId::new()).is_none());
    }

    #[test]
    fn insert_replaces_same_id() {
        let a = Track::new("a", 10.0);
        let catalog = InMemoryCatalog::from_tracks([a.clone()]);
        catalog.insert(a.clone().with_duration(99.0));

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get_track_by_id(a.id).unwrap().duration_secs, 99.0);
    }

    #[test]
    fn title_from_file_stem() {
        let track = Track::from_path("/music/Some Song.flac");
        assert_eq!(track.title, "Some Song");
        assert!(track.file_path.is_some());
    }

    #[test]
    fn track_id_round_trips_through_string() {
        let id = TrackId::new();
        assert_eq!(id.to_string().parse::<TrackId>().unwrap(), id);
    }
}
