//! Event types for the Tempo event system
//!
//! Provides the shared event vocabulary and the EventBus that carries it to
//! every consumer (SSE clients, loggers, tests).

mod playback_types;

pub use playback_types::{PlaybackLifecycle, RepeatMode};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Tempo event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TempoEvent {
    /// Session lifecycle moved (e.g. buffering → playing)
    LifecycleChanged {
        old_state: PlaybackLifecycle,
        new_state: PlaybackLifecycle,
        timestamp: DateTime<Utc>,
    },

    /// A track became audible as the current track
    TrackStarted {
        track_id: Uuid,
        queue_index: Option<usize>,
        /// True when the track arrived through a crossfade handoff
        via_crossfade: bool,
        timestamp: DateTime<Utc>,
    },

    /// A track could not be played
    ///
    /// Surfaced to the user as a "couldn't play this track" notification.
    /// The session keeps running; nothing is retried automatically.
    TrackFailed {
        track_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Non-fatal playback problem (e.g. can-play wait timed out)
    TrackWarning {
        track_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Queue contents or current index changed
    QueueChanged {
        queue: Vec<Uuid>,
        queue_index: Option<usize>,
        timestamp: DateTime<Utc>,
    },

    /// Shuffle or repeat mode changed
    ModeChanged {
        shuffle: bool,
        repeat: RepeatMode,
        timestamp: DateTime<Utc>,
    },

    /// Output volume changed (0.0-1.0)
    VolumeChanged {
        volume: f32,
        timestamp: DateTime<Utc>,
    },

    /// Playback rate changed
    SpeedChanged {
        speed: f32,
        timestamp: DateTime<Utc>,
    },

    /// Periodic position report for the current track
    PositionUpdate {
        track_id: Uuid,
        position_secs: f64,
        duration_secs: f64,
        timestamp: DateTime<Utc>,
    },

    /// Overlapping transition began
    CrossfadeStarted {
        from_track_id: Uuid,
        to_track_id: Uuid,
        fade_secs: f64,
        timestamp: DateTime<Utc>,
    },

    /// Incoming track was promoted to current
    CrossfadeCompleted {
        track_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Transition abandoned; playback continues on the outgoing track
    CrossfadeAborted {
        from_track_id: Uuid,
        to_track_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Equalizer bands, preset or enabled flag changed
    EqualizerChanged {
        enabled: bool,
        active_preset: Option<String>,
        gains_db: Vec<f32>,
        timestamp: DateTime<Utc>,
    },
}

impl TempoEvent {
    /// Event type name as used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            TempoEvent::LifecycleChanged { .. } => "LifecycleChanged",
            TempoEvent::TrackStarted { .. } => "TrackStarted",
            TempoEvent::TrackFailed { .. } => "TrackFailed",
            TempoEvent::TrackWarning { .. } => "TrackWarning",
            TempoEvent::QueueChanged { .. } => "QueueChanged",
            TempoEvent::ModeChanged { .. } => "ModeChanged",
            TempoEvent::VolumeChanged { .. } => "VolumeChanged",
            TempoEvent::SpeedChanged { .. } => "SpeedChanged",
            TempoEvent::PositionUpdate { .. } => "PositionUpdate",
            TempoEvent::CrossfadeStarted { .. } => "CrossfadeStarted",
            TempoEvent::CrossfadeCompleted { .. } => "CrossfadeCompleted",
            TempoEvent::CrossfadeAborted { .. } => "CrossfadeAborted",
            TempoEvent::EqualizerChanged { .. } => "EqualizerChanged",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Wraps a tokio broadcast channel:
/// - Publishing never blocks (slow subscribers lag instead)
/// - Any number of subscribers
/// - Subscribers only see events emitted after they subscribed
///
/// # Examples
///
/// ```
/// use tempo_common::events::{EventBus, PlaybackLifecycle, TempoEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(TempoEvent::LifecycleChanged {
///     old_state: PlaybackLifecycle::Paused,
///     new_state: PlaybackLifecycle::Playing,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TempoEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TempoEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: TempoEvent,
    ) -> Result<usize, broadcast::error::SendError<TempoEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TempoEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_an_error() {
        let bus = EventBus::new(8);
        let result = bus.emit(TempoEvent::VolumeChanged {
            volume: 0.5,
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        // lossy variant must not panic either
        bus.emit_lossy(TempoEvent::SpeedChanged {
            speed: 1.5,
            timestamp: Utc::now(),
        });
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(TempoEvent::VolumeChanged {
            volume: 0.25,
            timestamp: Utc::now(),
        });
        bus.emit_lossy(TempoEvent::SpeedChanged {
            speed: 2.0,
            timestamp: Utc::now(),
        });

        assert_eq!(rx.recv().await.unwrap().event_type(), "VolumeChanged");
        assert_eq!(rx.recv().await.unwrap().event_type(), "SpeedChanged");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let id = Uuid::new_v4();
        let event = TempoEvent::TrackFailed {
            track_id: id,
            reason: "source unavailable".to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "TrackFailed");
        assert_eq!(value["track_id"], id.to_string());
    }
}
