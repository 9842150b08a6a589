//! Shared integration test infrastructure for tempo-ap
//!
//! - `TestSession`: a playback session over generated WAV files at 8 kHz
//! - `run_until` / `settle`: drive the session's event loop by hand
//! - `SlowFileSystem`: per-path read delays for load-race tests

#![allow(dead_code)]

pub mod audio_generator;

pub use audio_generator::{tone_bytes, write_tone, TEST_SAMPLE_RATE};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tempo_ap::audio::{GraphRegistry, Mixer, ProcessingContext};
use tempo_ap::catalog::{InMemoryCatalog, Track, TrackId};
use tempo_ap::config::RuntimeSettings;
use tempo_ap::playback::{PlaybackSession, SessionDeps};
use tempo_ap::source::{FileSystem, LocalFileSystem, MemoryCache, SourceResolver};
use tempo_common::events::{EventBus, TempoEvent};
use tokio::sync::broadcast;

/// Generous bound for anything that only waits on decode and channels
pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestSession {
    /// Keeps the generated files alive
    pub dir: TempDir,
    pub session: PlaybackSession,
    pub events: broadcast::Receiver<TempoEvent>,
    pub tracks: Vec<TrackId>,
    pub mixer: Arc<Mixer>,
    pub cache: Arc<MemoryCache>,
}

impl TestSession {
    /// One generated tone file per entry of `secs`, in catalog order
    pub fn new(secs: &[f32], settings: RuntimeSettings) -> Self {
        Self::with_fs(secs, settings, |_| Arc::new(LocalFileSystem))
    }

    /// Like [`TestSession::new`] with a custom file system built from the track paths
    pub fn with_fs<F>(secs: &[f32], settings: RuntimeSettings, fs: F) -> Self
    where
        F: FnOnce(&[PathBuf]) -> Arc<dyn FileSystem>,
    {
        let dir = TempDir::new().expect("temp dir");
        let paths: Vec<PathBuf> = secs
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let path = dir.path().join(format!("track_{}.wav", i));
                write_tone(&path, *s, 220.0 * (i + 1) as f32).expect("write tone");
                path
            })
            .collect();
        let tracks: Vec<Track> = paths.iter().map(Track::from_path).collect();
        let fs = fs(&paths);
        Self::from_tracks(dir, tracks, settings, fs)
    }

    /// Session over arbitrary track records
    pub fn from_tracks(
        dir: TempDir,
        tracks: Vec<Track>,
        settings: RuntimeSettings,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        let ids = tracks.iter().map(|t| t.id).collect();
        let context = Arc::new(ProcessingContext::new(TEST_SAMPLE_RATE));
        let mixer = Arc::new(Mixer::new(Arc::clone(&context)));
        let cache = Arc::new(MemoryCache::new());
        let bus = EventBus::new(1024);
        let events = bus.subscribe();
        let deps = SessionDeps {
            catalog: Arc::new(InMemoryCatalog::from_tracks(tracks)),
            resolver: Arc::new(SourceResolver::new(fs, Arc::clone(&cache))),
            registry: Arc::new(GraphRegistry::new(context)),
            mixer: Arc::clone(&mixer),
            bus,
        };
        let mut session = PlaybackSession::new(deps, settings);
        session.seed_rng(7);
        Self {
            dir,
            session,
            events,
            tracks: ids,
            mixer,
            cache,
        }
    }

    pub fn track(&self, index: usize) -> TrackId {
        self.tracks[index]
    }

    /// Everything published on the bus since the last call
    pub fn take_events(&mut self) -> Vec<TempoEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    /// Render `secs` of audio, then process the events it produced
    pub async fn play_for(&mut self, secs: f64) {
        self.mixer.render_for(secs);
        settle(&mut self.session, Duration::from_millis(20)).await;
    }

    pub async fn run_until<F>(&mut self, done: F) -> bool
    where
        F: FnMut(&PlaybackSession) -> bool,
    {
        run_until(&mut self.session, WAIT, done).await
    }
}

/// Feed events to the session until `done` holds or `timeout` passes
pub async fn run_until<F>(session: &mut PlaybackSession, timeout: Duration, mut done: F) -> bool
where
    F: FnMut(&PlaybackSession) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if done(session) {
            return true;
        }
        match tokio::time::timeout_at(deadline, session.next_event()).await {
            Ok(Some(event)) => session.handle_event(event),
            Ok(None) | Err(_) => return done(session),
        }
    }
}

/// Process whatever arrives within `window`
pub async fn settle(session: &mut PlaybackSession, window: Duration) {
    run_until(session, window, |_| false).await;
}

pub fn count<F>(events: &[TempoEvent], pred: F) -> usize
where
    F: Fn(&TempoEvent) -> bool,
{
    events.iter().filter(|e| pred(e)).count()
}

/// Local file system with an artificial delay before reading chosen paths
pub struct SlowFileSystem {
    delays: HashMap<PathBuf, Duration>,
}

impl SlowFileSystem {
    pub fn new() -> Self {
        Self {
            delays: HashMap::new(),
        }
    }

    pub fn delay(mut self, path: &Path, delay: Duration) -> Self {
        self.delays.insert(path.to_path_buf(), delay);
        self
    }
}

#[async_trait]
impl FileSystem for SlowFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        LocalFileSystem.exists(path).await
    }

    async fn read_bytes(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        if let Some(delay) = self.delays.get(path) {
            tokio::time::sleep(*delay).await;
        }
        LocalFileSystem.read_bytes(path).await
    }
}
