//! Playback-related type definitions
//!
//! Supporting types for the session lifecycle and queue modes.

use serde::{Deserialize, Serialize};

/// Transient playback lifecycle of the session
///
/// Derived from output I/O status rather than stored user intent, so it is
/// reported alongside the persisted state but never snapshotted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackLifecycle {
    /// Nothing loaded, or the last load failed
    #[default]
    Idle,
    /// Waiting for a source to resolve or the output to become playable
    Buffering,
    /// Audio is being rendered
    Playing,
    /// Loaded but not rendering
    Paused,
    /// Auto-advance ran off the end of the queue
    Ended,
}

impl std::fmt::Display for PlaybackLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackLifecycle::Idle => write!(f, "idle"),
            PlaybackLifecycle::Buffering => write!(f, "buffering"),
            PlaybackLifecycle::Playing => write!(f, "playing"),
            PlaybackLifecycle::Paused => write!(f, "paused"),
            PlaybackLifecycle::Ended => write!(f, "ended"),
        }
    }
}

/// Queue repeat mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    None,
    All,
    One,
}

impl RepeatMode {
    /// Next mode in the none → all → one → none cycle
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::None => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::None,
        }
    }
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::None => write!(f, "none"),
            RepeatMode::All => write!(f, "all"),
            RepeatMode::One => write!(f, "one"),
        }
    }
}

impl std::str::FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(RepeatMode::None),
            "all" => Ok(RepeatMode::All),
            "one" => Ok(RepeatMode::One),
            other => Err(format!("unknown repeat mode '{}'", other)),
        }
    }
}
