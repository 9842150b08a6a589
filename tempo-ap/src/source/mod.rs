//! Source resolution
//!
//! Turns a track reference into playable bytes. A file path wins when the
//! file exists and reads cleanly; otherwise the in-memory cache is consulted.
//! Neither being available is a non-fatal `SourceUnavailable`.

mod guard;

pub use guard::{LoadGuard, LoadOrigin, LoadTicket};

use crate::catalog::{Track, TrackId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// File extensions the player treats as audio
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "wma", "aiff", "ape", "opus", "webm",
];

/// True if the path carries one of [`AUDIO_EXTENSIONS`] (case-insensitive)
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// File system access used by the resolver
///
/// Implementations must be callable from any tokio task.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
    async fn read_bytes(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// [`FileSystem`] backed by `tokio::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_bytes(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

/// Process-lifetime byte cache keyed by track id (never persisted)
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<TrackId, Arc<[u8]>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TrackId) -> Option<Arc<[u8]>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn set(&self, id: TrackId, bytes: impl Into<Arc<[u8]>>) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, bytes.into());
    }

    pub fn remove(&self, id: TrackId) -> Option<Arc<[u8]>> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where resolved bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    Disk,
    Memory,
}

/// Bytes ready for decoding
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub track_id: TrackId,
    pub bytes: Arc<[u8]>,
    /// Lowercase extension used as the container probe hint
    pub format_hint: Option<String>,
    pub origin: SourceOrigin,
}

/// Resolves tracks to bytes from disk or the memory cache
pub struct SourceResolver {
    fs: Arc<dyn FileSystem>,
    cache: Arc<MemoryCache>,
}

impl SourceResolver {
    pub fn new(fs: Arc<dyn FileSystem>, cache: Arc<MemoryCache>) -> Self {
        Self { fs, cache }
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    /// Resolve a track to bytes
    ///
    /// # Returns
    /// * `Ok(ResolvedSource)` - bytes from disk or memory
    /// * `Err(Error::SourceUnavailable)` - neither source could supply bytes
    pub async fn resolve(&self, track: &Track) -> Result<ResolvedSource> {
        let hint = track
            .file_path
            .as_deref()
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        if let Some(path) = track.file_path.as_deref() {
            if self.fs.exists(path).await {
                match self.fs.read_bytes(path).await {
                    Ok(bytes) => {
                        debug!(track_id = %track.id, path = %path.display(), len = bytes.len(), "Resolved from disk");
                        return Ok(ResolvedSource {
                            track_id: track.id,
                            bytes: bytes.into(),
                            format_hint: hint,
                            origin: SourceOrigin::Disk,
                        });
                    }
                    Err(e) => {
                        warn!(track_id = %track.id, path = %path.display(), "Read failed, trying memory cache: {}", e);
                    }
                }
            } else {
                debug!(track_id = %track.id, path = %path.display(), "Path missing, trying memory cache");
            }
        }

        let cached = track
            .cached_bytes
            .clone()
            .or_else(|| self.cache.get(track.id));

        match cached {
            Some(bytes) => {
                debug!(track_id = %track.id, len = bytes.len(), "Resolved from memory");
                Ok(ResolvedSource {
                    track_id: track.id,
                    bytes,
                    format_hint: hint,
                    origin: SourceOrigin::Memory,
                })
            }
            None => Err(Error::SourceUnavailable {
                track_id: track.id,
                reason: match &track.file_path {
                    Some(p) => format!("{} is unreadable and no cached copy exists", p.display()),
                    None => "no file path and no cached copy".to_string(),
                },
            }),
        }
    }
}
