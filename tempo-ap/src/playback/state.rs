//! Playback state and snapshots
//!
//! `PlaybackState` is user intent: what is queued, where we are in it, the
//! play modes and whether the user wants sound. Transient I/O status lives in
//! [`PlaybackLifecycle`](tempo_common::events::PlaybackLifecycle) instead.

use crate::catalog::TrackId;
use crate::config::RuntimeSettings;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempo_common::events::RepeatMode;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub current_track_id: Option<TrackId>,
    pub queue: Vec<TrackId>,
    /// `None` when nothing in the queue is current
    pub queue_index: Option<usize>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    /// 0.0-1.0
    pub volume: f32,
    /// Playback rate multiplier
    pub speed: f64,
    pub is_playing: bool,
    /// Where the queue came from; informational only
    pub current_playlist_id: Option<Uuid>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

/// What `remove_from_queue` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    NotFound,
    /// The current track was removed; nothing is current any more
    RemovedCurrent,
    /// Another entry was removed at this position
    Removed(usize),
}

impl PlaybackState {
    /// Fresh state using the configured defaults
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            current_track_id: None,
            queue: Vec::new(),
            queue_index: None,
            shuffle: settings.default_shuffle,
            repeat: settings.default_repeat,
            volume: settings.default_volume,
            speed: 1.0,
            is_playing: false,
            current_playlist_id: None,
        }
    }

    /// Point at queue entry `index`
    pub fn select(&mut self, index: usize) -> Option<TrackId> {
        let id = *self.queue.get(index)?;
        self.queue_index = Some(index);
        self.current_track_id = Some(id);
        Some(id)
    }

    pub fn position_of(&self, track_id: TrackId) -> Option<usize> {
        self.queue.iter().position(|id| *id == track_id)
    }

    pub fn clear_current(&mut self) {
        self.current_track_id = None;
        self.queue_index = None;
        self.is_playing = false;
    }

    /// Remove a track from the queue
    ///
    /// Removing the current track clears the current-track state. Removing
    /// any other entry keeps `current_track_id` and shifts `queue_index`
    /// down when the removed slot preceded it.
    pub fn remove_from_queue(&mut self, track_id: TrackId) -> RemoveOutcome {
        if self.current_track_id == Some(track_id) {
            match self.queue_index {
                Some(i) if self.queue.get(i) == Some(&track_id) => {
                    self.queue.remove(i);
                }
                _ => {
                    if let Some(pos) = self.position_of(track_id) {
                        self.queue.remove(pos);
                    }
                }
            }
            self.clear_current();
            return RemoveOutcome::RemovedCurrent;
        }

        let Some(pos) = self.position_of(track_id) else {
            return RemoveOutcome::NotFound;
        };
        self.queue.remove(pos);
        self.queue_index = self.queue_index.map(|i| index_after_remove(i, pos));
        RemoveOutcome::Removed(pos)
    }

    /// Move the entry at `from` to `to`, keeping `queue_index` on the same track
    pub fn reorder_queue(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.queue.len();
        if from >= len || to >= len {
            return Err(Error::Queue(format!(
                "reorder {} -> {} out of range for queue of {}",
                from, to, len
            )));
        }
        let id = self.queue.remove(from);
        self.queue.insert(to, id);
        self.queue_index = self.queue_index.map(|i| index_after_move(i, from, to));
        Ok(())
    }

    /// Drop indices that no longer point into the queue
    pub fn sanitized(mut self) -> Self {
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        if !self.speed.is_finite() || self.speed <= 0.0 {
            self.speed = 1.0;
        }
        match self.queue_index {
            Some(i) if i < self.queue.len() => {
                self.current_track_id = Some(self.queue[i]);
            }
            Some(_) => self.queue_index = None,
            None => {}
        }
        self
    }
}

/// Where index `i` ends up after the entry at `removed` is deleted
pub fn index_after_remove(i: usize, removed: usize) -> usize {
    if removed < i {
        i - 1
    } else {
        i
    }
}

/// Where index `i` ends up after moving the entry at `from` to `to`
pub fn index_after_move(i: usize, from: usize, to: usize) -> usize {
    if i == from {
        to
    } else if from < i && to >= i {
        i - 1
    } else if from > i && to <= i {
        i + 1
    } else {
        i
    }
}

/// Persisted copy of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub position_secs: f64,
    pub saved_at: DateTime<Utc>,
}

impl PlaybackSnapshot {
    pub fn new(state: PlaybackState, position_secs: f64) -> Self {
        Self {
            state,
            position_secs,
            saved_at: Utc::now(),
        }
    }

    /// State to resume from; never resumes playing on its own
    pub fn restored_state(&self) -> PlaybackState {
        let mut state = self.state.clone().sanitized();
        state.is_playing = false;
        state
    }
}
