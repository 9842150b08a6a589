//! Error types for tempo-ap
//!
//! Playback failures are split so the session can tell a track that could not
//! be played (reported, session continues) from a fault in the engine itself.

use crate::catalog::TrackId;
use thiserror::Error;

/// Main error type for tempo-ap
#[derive(Error, Debug)]
pub enum Error {
    /// No bytes could be resolved for the track (neither disk nor cache)
    #[error("Source unavailable for track {track_id}: {reason}")]
    SourceUnavailable { track_id: TrackId, reason: String },

    /// The byte stream could not be decoded
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// A bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Next-track preload failed during a scheduled crossfade
    #[error("Crossfade failed: {0}")]
    Crossfade(String),

    /// Queue manipulation errors (bad indices, empty queue)
    #[error("Queue error: {0}")]
    Queue(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot / settings encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors bubbled up from tempo-common
    #[error(transparent)]
    Common(#[from] tempo_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures the user sees as "couldn't play this track"
    ///
    /// These are recovered locally: the session stays alive and nothing is
    /// retried automatically.
    pub fn is_track_failure(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. }
                | Error::Decode(_)
                | Error::AudioOutput(_)
                | Error::Timeout(_)
                | Error::Crossfade(_)
        )
    }

    /// True when the track is started anyway and the failure is only a warning
    pub fn plays_anyway(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Convenience Result type using tempo-ap Error
pub type Result<T> = std::result::Result<T, Error>;
