//! Crossfade transport
//!
//! The session owns exactly one [`Transport`]. While it is `Single` one deck
//! is audible; `Transitioning` holds both decks of an in-progress crossfade,
//! so a second overlapping crossfade cannot be represented.

use crate::audio::{AudioGraph, Deck};
use crate::catalog::TrackId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempo_common::events::RepeatMode;
use tempo_common::FadeCurve;
use tokio::task::JoinHandle;

static NEXT_CROSSFADE_ID: AtomicU64 = AtomicU64::new(1);

/// Queue entry the crossfade is heading for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossfadeTarget {
    pub index: usize,
    pub track_id: TrackId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadePhase {
    /// Waiting for the next track's bytes
    Resolving,
    /// Incoming deck is decoding load `token`
    Decoding { token: u64 },
    /// Gains are ramping; `step` of `steps` applied
    Fading { step: usize, steps: usize },
}

pub struct CrossfadeSession {
    pub id: u64,
    pub outgoing: Arc<Deck>,
    pub incoming: Arc<Deck>,
    pub target: CrossfadeTarget,
    pub phase: CrossfadePhase,
    pub fade_secs: f64,
    pub curve: FadeCurve,
    /// Outgoing deck ran out before the fade finished
    pub outgoing_ended: bool,
    /// Step ticker while fading
    pub timer: Option<JoinHandle<()>>,
}

impl CrossfadeSession {
    pub fn new(
        outgoing: Arc<Deck>,
        incoming: Arc<Deck>,
        target: CrossfadeTarget,
        fade_secs: f64,
        curve: FadeCurve,
    ) -> Self {
        Self {
            id: NEXT_CROSSFADE_ID.fetch_add(1, Ordering::Relaxed),
            outgoing,
            incoming,
            target,
            phase: CrossfadePhase::Resolving,
            fade_secs,
            curve,
            outgoing_ended: false,
            timer: None,
        }
    }

    /// 0.0 until fading starts, then the fraction of steps applied
    pub fn progress(&self) -> f32 {
        match self.phase {
            CrossfadePhase::Fading { step, steps } => step as f32 / steps.max(1) as f32,
            _ => 0.0,
        }
    }

    pub fn is_fading(&self) -> bool {
        matches!(self.phase, CrossfadePhase::Fading { .. })
    }

    pub fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for CrossfadeSession {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

pub enum Transport {
    Single(Arc<Deck>),
    Transitioning(CrossfadeSession),
}

impl Transport {
    /// The deck the user hears as "now playing" (outgoing during a fade)
    pub fn current(&self) -> &Arc<Deck> {
        match self {
            Transport::Single(deck) => deck,
            Transport::Transitioning(session) => &session.outgoing,
        }
    }

    pub fn incoming(&self) -> Option<&Arc<Deck>> {
        match self {
            Transport::Single(_) => None,
            Transport::Transitioning(session) => Some(&session.incoming),
        }
    }

    pub fn crossfade(&self) -> Option<&CrossfadeSession> {
        match self {
            Transport::Single(_) => None,
            Transport::Transitioning(session) => Some(session),
        }
    }

    pub fn crossfade_mut(&mut self) -> Option<&mut CrossfadeSession> {
        match self {
            Transport::Single(_) => None,
            Transport::Transitioning(session) => Some(session),
        }
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, Transport::Transitioning(_))
    }

    /// Graphs of the live decks, current first
    pub fn graphs(&self) -> Vec<Arc<AudioGraph>> {
        std::iter::once(self.current())
            .chain(self.incoming())
            .filter_map(|deck| deck.graph())
            .collect()
    }
}

/// Inputs to the crossfade trigger check
#[derive(Debug, Clone, Copy)]
pub struct TriggerCheck {
    pub fade_secs: f64,
    pub transitioning: bool,
    pub repeat: RepeatMode,
    pub playing: bool,
    pub position_secs: f64,
    pub duration_secs: f64,
}

/// Start a crossfade now?
///
/// Requires a configured fade, no crossfade already running, repeat other
/// than one, active playback, at most `fade_secs` left, and a track long
/// enough that consecutive fade windows cannot overlap.
pub fn should_trigger(check: &TriggerCheck) -> bool {
    if check.fade_secs <= 0.0 || check.transitioning || !check.playing {
        return false;
    }
    if check.repeat == RepeatMode::One {
        return false;
    }
    if check.duration_secs <= 2.0 * check.fade_secs {
        return false;
    }
    let remaining = check.duration_secs - check.position_secs;
    remaining <= check.fade_secs
}

/// Number of gain steps for a fade
pub fn step_count(fade_secs: f64, step: Duration) -> usize {
    let step_secs = step.as_secs_f64();
    if step_secs <= 0.0 {
        return 1;
    }
    ((fade_secs / step_secs).round() as usize).max(1)
}

/// (outgoing, incoming) gains after `step` of `steps`
pub fn step_gains(curve: FadeCurve, volume: f32, step: usize, steps: usize) -> (f32, f32) {
    let progress = (step as f32 / steps.max(1) as f32).clamp(0.0, 1.0);
    (
        volume * curve.fade_out(progress),
        volume * curve.fade_in(progress),
    )
}
