//! Playback session
//!
//! `PlaybackSession` is the only writer of [`PlaybackState`]. Operations are
//! synchronous and never wait on I/O: loads, decode completion, timeouts and
//! crossfade steps come back later as [`SessionEvent`]s, which the owner
//! feeds to [`PlaybackSession::handle_event`] in arrival order. Every load
//! carries a [`LoadTicket`]; completions for a ticket that is no longer
//! pending are stale and dropped.

use super::crossfade::{
    should_trigger, step_count, step_gains, CrossfadePhase, CrossfadeSession, CrossfadeTarget,
    Transport, TriggerCheck,
};
use super::queue::{next_index, previous_index, NextIndex, PreviousIndex};
use super::state::{
    index_after_move, index_after_remove, PlaybackSnapshot, PlaybackState, RemoveOutcome,
};
use crate::audio::deck::DeckListener;
use crate::audio::{AudioGraph, Deck, DeckEvent, DeckEventKind, GraphRegistry, Mixer, OutputId};
use crate::catalog::{Catalog, TrackId};
use crate::config::{RuntimeSettings, MAX_SPEED, MIN_SPEED};
use crate::error::{Error, Result};
use crate::source::{LoadGuard, LoadOrigin, LoadTicket, ResolvedSource, SourceResolver};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tempo_common::events::{EventBus, PlaybackLifecycle, RepeatMode, TempoEvent};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `previous()` restarts the track once more than this much has played
pub const PREVIOUS_RESTART_SECS: f64 = 3.0;

/// Playback progress that makes the periodic snapshot due again
pub const SNAPSHOT_POSITION_STEP_SECS: f64 = 0.5;

/// Collaborators a session is built from
#[derive(Clone)]
pub struct SessionDeps {
    pub catalog: Arc<dyn Catalog>,
    pub resolver: Arc<SourceResolver>,
    pub registry: Arc<GraphRegistry>,
    pub mixer: Arc<Mixer>,
    pub bus: EventBus,
}

/// Completions and timers delivered back into the session
#[derive(Debug)]
pub enum SessionEvent {
    Deck(DeckEvent),
    SourceResolved {
        ticket: LoadTicket,
        track_id: TrackId,
        result: Result<ResolvedSource>,
    },
    CanPlayTimeout {
        ticket: LoadTicket,
    },
    CrossfadeResolved {
        id: u64,
        result: Result<ResolvedSource>,
    },
    CrossfadeStep {
        id: u64,
    },
    CrossfadeCanPlayTimeout {
        id: u64,
    },
}

/// Read-only view for consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub lifecycle: PlaybackLifecycle,
    pub state: PlaybackState,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
    /// Present while a crossfade is running
    pub crossfade_progress: Option<f32>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            lifecycle: PlaybackLifecycle::Idle,
            state: PlaybackState::default(),
            position_secs: 0.0,
            duration_secs: None,
            crossfade_progress: None,
        }
    }
}

#[derive(Debug)]
struct PendingLoad {
    ticket: LoadTicket,
    track_id: TrackId,
    /// Start playing once the deck can play
    autoplay: bool,
    /// Seek here once the deck can play
    resume_at: Option<f64>,
    /// Deck load token, known once the bytes were handed to the deck
    deck_token: Option<u64>,
}

pub struct PlaybackSession {
    state: PlaybackState,
    lifecycle: PlaybackLifecycle,
    settings: RuntimeSettings,
    catalog: Arc<dyn Catalog>,
    resolver: Arc<SourceResolver>,
    registry: Arc<GraphRegistry>,
    mixer: Arc<Mixer>,
    bus: EventBus,
    transport: Transport,
    guard: LoadGuard,
    pending: Option<PendingLoad>,
    /// (deck, load token) whose crossfade already failed once
    crossfade_blocked: Option<(OutputId, u64)>,
    rng: StdRng,
    deck_tx: DeckListener,
    deck_rx: mpsc::UnboundedReceiver<DeckEvent>,
    internal_tx: mpsc::UnboundedSender<SessionEvent>,
    internal_rx: mpsc::UnboundedReceiver<SessionEvent>,
    graph_feed: watch::Sender<Vec<Arc<AudioGraph>>>,
    dirty: bool,
    /// Position written by the last periodic snapshot
    saved_position: Option<f64>,
}

impl PlaybackSession {
    pub fn new(deps: SessionDeps, settings: RuntimeSettings) -> Self {
        let (deck_tx, deck_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (graph_feed, _) = watch::channel(Vec::new());
        let state = PlaybackState::from_settings(&settings);

        let deck = Deck::new(deps.mixer.sample_rate());
        deck.attach_listener(deck_tx.clone());
        deck.set_volume_immediate(state.volume);
        deps.mixer.attach(Arc::clone(&deck));

        Self {
            state,
            lifecycle: PlaybackLifecycle::Idle,
            settings,
            catalog: deps.catalog,
            resolver: deps.resolver,
            registry: deps.registry,
            mixer: deps.mixer,
            bus: deps.bus,
            transport: Transport::Single(deck),
            guard: LoadGuard::new(),
            pending: None,
            crossfade_blocked: None,
            rng: StdRng::from_entropy(),
            deck_tx,
            deck_rx,
            internal_tx,
            internal_rx,
            graph_feed,
            dirty: false,
            saved_position: None,
        }
    }

    /// Make shuffle picks reproducible
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    // ----- read side -----

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn lifecycle(&self) -> PlaybackLifecycle {
        self.lifecycle
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// The deck holding the current track (outgoing during a crossfade)
    pub fn current_deck(&self) -> &Arc<Deck> {
        self.transport.current()
    }

    pub fn incoming_deck(&self) -> Option<&Arc<Deck>> {
        self.transport.incoming()
    }

    pub fn is_crossfading(&self) -> bool {
        self.transport.is_transitioning()
    }

    pub fn crossfade_progress(&self) -> Option<f32> {
        self.transport.crossfade().map(|cf| cf.progress())
    }

    /// A load has been started and has not reached can-play yet
    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Live graphs, current first and the incoming one during a crossfade
    pub fn graph_feed(&self) -> watch::Receiver<Vec<Arc<AudioGraph>>> {
        self.graph_feed.subscribe()
    }

    pub fn position_secs(&self) -> f64 {
        match self.pending.as_ref().and_then(|p| p.resume_at) {
            Some(pos) => pos,
            None => self.transport.current().current_time(),
        }
    }

    /// Duration of the current track, decoded if possible, else from the catalog
    pub fn duration_secs(&self) -> Option<f64> {
        if self.pending.is_none() {
            if let Some(duration) = self.transport.current().duration() {
                return Some(duration);
            }
        }
        self.state
            .current_track_id
            .and_then(|id| self.catalog.get_track_by_id(id))
            .map(|t| t.duration_secs)
            .filter(|d| *d > 0.0)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            lifecycle: self.lifecycle,
            state: self.state.clone(),
            position_secs: self.position_secs(),
            duration_secs: self.duration_secs(),
            crossfade_progress: self.crossfade_progress(),
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot::new(self.state.clone(), self.position_secs())
    }

    /// True once per batch of state changes since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Whether the periodic snapshot should be written now
    ///
    /// Due after any state change, and while playing once the position has
    /// moved [`SNAPSHOT_POSITION_STEP_SECS`] past the last saved one.
    pub fn take_snapshot_due(&mut self) -> bool {
        let position = self.position_secs();
        let advanced = self.lifecycle == PlaybackLifecycle::Playing
            && self
                .saved_position
                .map_or(true, |saved| (position - saved).abs() >= SNAPSHOT_POSITION_STEP_SECS);
        let due = self.take_dirty() || advanced;
        if due {
            self.saved_position = Some(position);
        }
        due
    }

    // ----- operations -----

    /// Rebuild the queue from the whole catalog and play `track_id`
    pub fn play_track(&mut self, track_id: TrackId, playlist_id: Option<Uuid>) -> Result<()> {
        if self.catalog.get_track_by_id(track_id).is_none() {
            return Err(Error::NotFound(format!("track {}", track_id)));
        }
        self.cancel_crossfade("superseded by play request");
        let Some(ticket) = self.guard.begin(LoadOrigin::User) else {
            return Ok(());
        };

        let mut queue = self.catalog.list_tracks();
        if self.state.shuffle {
            queue.shuffle(&mut self.rng);
        }
        let index = match queue.iter().position(|id| *id == track_id) {
            Some(i) => i,
            None => {
                queue.push(track_id);
                queue.len() - 1
            }
        };

        self.state.queue = queue;
        self.state.current_playlist_id = playlist_id;
        self.state.select(index);
        self.state.is_playing = true;
        info!(track_id = %track_id, index, shuffle = self.state.shuffle, "Play track");
        self.emit_queue_changed();
        self.launch_load(ticket, track_id, true, None);
        Ok(())
    }

    /// Jump to `track_id` within the current queue, or play it fresh
    pub fn play_from_queue(&mut self, track_id: TrackId) -> Result<()> {
        match self.state.position_of(track_id) {
            Some(index) => {
                self.cancel_crossfade("superseded by queue selection");
                self.advance_to(index, LoadOrigin::User);
                Ok(())
            }
            None => self.play_track(track_id, self.state.current_playlist_id),
        }
    }

    pub fn toggle_play_pause(&mut self) -> Result<()> {
        if self.state.current_track_id.is_none() {
            return match self.catalog.list_tracks().first().copied() {
                Some(first) => self.play_track(first, self.state.current_playlist_id),
                None => Ok(()),
            };
        }
        if self.state.is_playing {
            self.pause();
        } else {
            self.resume();
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<()> {
        if self.state.queue.is_empty() {
            return Ok(());
        }
        self.cancel_crossfade("skipped");
        match next_index(&self.state, &mut self.rng) {
            NextIndex::Index(index) => {
                self.advance_to(index, LoadOrigin::User);
            }
            NextIndex::EndOfQueue => self.stop_at_end_of_queue(),
        }
        Ok(())
    }

    pub fn previous(&mut self) -> Result<()> {
        if self.state.current_track_id.is_none() && self.state.queue.is_empty() {
            return Ok(());
        }
        let elapsed = self.position_secs();
        if elapsed > PREVIOUS_RESTART_SECS {
            self.cancel_crossfade("restarted");
            self.restart_current();
            return Ok(());
        }
        self.cancel_crossfade("skipped back");
        match previous_index(&self.state, &mut self.rng) {
            PreviousIndex::Index(index) => {
                self.advance_to(index, LoadOrigin::User);
            }
            PreviousIndex::Restart => self.restart_current(),
        }
        Ok(())
    }

    /// Move within the current track; never changes `is_playing`
    pub fn seek(&mut self, position_secs: f64) -> Result<()> {
        if !position_secs.is_finite() {
            return Err(Error::InvalidState(format!(
                "seek position {} is not a number",
                position_secs
            )));
        }
        self.cancel_crossfade("seek");
        let target = match self.duration_secs() {
            Some(duration) => position_secs.clamp(0.0, duration),
            None => position_secs.max(0.0),
        };
        match self.pending.as_mut() {
            Some(pending) => pending.resume_at = Some(target),
            None => self.transport.current().seek(target),
        }
        debug!(position = target, "Seek");
        self.dirty = true;
        Ok(())
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(Error::InvalidState(format!("volume {} is not a number", volume)));
        }
        let volume = volume.clamp(0.0, 1.0);
        self.state.volume = volume;
        match &self.transport {
            Transport::Single(deck) => deck.set_volume(volume),
            Transport::Transitioning(cf) => match cf.phase {
                CrossfadePhase::Fading { step, steps } => {
                    let (out_gain, in_gain) = step_gains(cf.curve, volume, step, steps);
                    cf.outgoing.set_volume(out_gain);
                    cf.incoming.set_volume(in_gain);
                }
                _ => cf.outgoing.set_volume(volume),
            },
        }
        self.emit(TempoEvent::VolumeChanged {
            volume,
            timestamp: Utc::now(),
        });
        self.dirty = true;
        Ok(())
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        if !speed.is_finite() {
            return Err(Error::InvalidState(format!("speed {} is not a number", speed)));
        }
        let speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.state.speed = speed;
        self.transport.current().set_rate(speed as f32);
        if let Some(incoming) = self.transport.incoming() {
            incoming.set_rate(speed as f32);
        }
        self.emit(TempoEvent::SpeedChanged {
            speed: speed as f32,
            timestamp: Utc::now(),
        });
        self.dirty = true;
        Ok(())
    }

    pub fn toggle_shuffle(&mut self) -> Result<()> {
        self.state.shuffle = !self.state.shuffle;
        info!(shuffle = self.state.shuffle, "Shuffle toggled");
        self.emit_mode_changed();
        self.dirty = true;
        Ok(())
    }

    /// none -> all -> one -> none
    pub fn cycle_repeat(&mut self) -> Result<()> {
        self.state.repeat = self.state.repeat.cycle();
        info!(repeat = %self.state.repeat, "Repeat cycled");
        self.emit_mode_changed();
        self.dirty = true;
        Ok(())
    }

    pub fn remove_from_queue(&mut self, track_id: TrackId) -> Result<()> {
        let mut resume_ended = false;
        if self.state.current_track_id == Some(track_id) {
            self.cancel_crossfade("current track removed");
        } else if self
            .transport
            .crossfade()
            .is_some_and(|cf| cf.target.track_id == track_id)
        {
            resume_ended = self.cancel_crossfade("next track removed").unwrap_or(false);
        }

        match self.state.remove_from_queue(track_id) {
            RemoveOutcome::NotFound => {
                return Err(Error::NotFound(format!("track {} is not queued", track_id)));
            }
            RemoveOutcome::RemovedCurrent => {
                info!(track_id = %track_id, "Current track removed from queue");
                if let Some(pending) = self.pending.take() {
                    self.guard.finish(&pending.ticket);
                }
                self.guard.cancel();
                self.transport.current().reset();
                self.set_lifecycle(PlaybackLifecycle::Idle);
            }
            RemoveOutcome::Removed(pos) => {
                if let Some(cf) = self.transport.crossfade_mut() {
                    cf.target.index = index_after_remove(cf.target.index, pos);
                }
            }
        }
        self.emit_queue_changed();
        self.dirty = true;
        if resume_ended {
            self.on_track_ended();
        }
        Ok(())
    }

    pub fn reorder_queue(&mut self, from: usize, to: usize) -> Result<()> {
        self.state.reorder_queue(from, to)?;
        if let Some(cf) = self.transport.crossfade_mut() {
            cf.target.index = index_after_move(cf.target.index, from, to);
        }
        self.emit_queue_changed();
        self.dirty = true;
        Ok(())
    }

    /// Adopt a saved session without resuming playback
    ///
    /// The current track is preloaded paused and positioned once it can
    /// play. Dropped entirely when a user load is already in flight.
    pub fn restore(&mut self, snapshot: &PlaybackSnapshot) -> bool {
        if self
            .guard
            .in_flight()
            .is_some_and(|t| t.origin == LoadOrigin::User)
        {
            debug!("User load in flight, dropping session restore");
            return false;
        }

        self.cancel_crossfade("restore");
        self.state = snapshot.restored_state();
        let deck = Arc::clone(self.transport.current());
        deck.pause();
        deck.set_volume_immediate(self.state.volume);
        deck.set_rate(self.state.speed as f32);
        info!(
            queue_len = self.state.queue.len(),
            index = ?self.state.queue_index,
            position = snapshot.position_secs,
            "Restoring session"
        );
        self.emit_queue_changed();
        self.emit_mode_changed();

        if let Some(track_id) = self.state.current_track_id {
            if let Some(ticket) = self.guard.begin(LoadOrigin::Restore) {
                self.launch_load(ticket, track_id, false, Some(snapshot.position_secs.max(0.0)));
            }
        }
        true
    }

    /// Stop everything and take this session's decks off the mixer
    pub fn shutdown(&mut self) {
        self.cancel_crossfade("shutdown");
        self.guard.cancel();
        self.pending = None;
        let deck = Arc::clone(self.transport.current());
        deck.pause();
        self.mixer.detach(deck.id());
        self.graph_feed.send_replace(Vec::new());
        debug!("Session shut down");
    }

    // ----- event loop -----

    /// Wait for the next completion, deck event or timer
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            Some(event) = self.deck_rx.recv() => Some(SessionEvent::Deck(event)),
            Some(event) = self.internal_rx.recv() => Some(event),
            else => None,
        }
    }

    /// Next event if one is already queued
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        if let Ok(event) = self.deck_rx.try_recv() {
            return Some(SessionEvent::Deck(event));
        }
        self.internal_rx.try_recv().ok()
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Deck(event) => self.on_deck_event(event),
            SessionEvent::SourceResolved {
                ticket,
                track_id,
                result,
            } => self.on_source_resolved(ticket, track_id, result),
            SessionEvent::CanPlayTimeout { ticket } => self.on_canplay_timeout(ticket),
            SessionEvent::CrossfadeResolved { id, result } => self.on_crossfade_resolved(id, result),
            SessionEvent::CrossfadeStep { id } => self.on_crossfade_step(id),
            SessionEvent::CrossfadeCanPlayTimeout { id } => self.on_crossfade_canplay_timeout(id),
        }
    }

    // ----- loading -----

    fn advance_to(&mut self, index: usize, origin: LoadOrigin) -> bool {
        let Some(track_id) = self.state.queue.get(index).copied() else {
            return false;
        };
        let Some(ticket) = self.guard.begin(origin) else {
            return false;
        };
        self.state.select(index);
        self.state.is_playing = true;
        self.emit_queue_changed();
        self.launch_load(ticket, track_id, true, None);
        true
    }

    fn launch_load(&mut self, ticket: LoadTicket, track_id: TrackId, autoplay: bool, resume_at: Option<f64>) {
        let deck = Arc::clone(self.transport.current());
        deck.reset();
        deck.set_rate(self.state.speed as f32);
        deck.set_volume(self.state.volume);
        self.ensure_graph(&deck);

        debug!(track_id = %track_id, generation = ticket.generation, origin = ?ticket.origin, "Load started");
        self.pending = Some(PendingLoad {
            ticket,
            track_id,
            autoplay,
            resume_at,
            deck_token: None,
        });
        self.set_lifecycle(PlaybackLifecycle::Buffering);
        self.dirty = true;

        let track = self.catalog.get_track_by_id(track_id);
        let resolver = Arc::clone(&self.resolver);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match track {
                Some(track) => resolver.resolve(&track).await,
                None => Err(Error::SourceUnavailable {
                    track_id,
                    reason: "not in catalog".to_string(),
                }),
            };
            let _ = tx.send(SessionEvent::SourceResolved {
                ticket,
                track_id,
                result,
            });
        });
    }

    fn on_source_resolved(&mut self, ticket: LoadTicket, track_id: TrackId, result: Result<ResolvedSource>) {
        let pending_ticket = self.pending.as_ref().map(|p| p.ticket);
        if pending_ticket != Some(ticket) || !self.guard.is_current(&ticket) {
            debug!(track_id = %track_id, generation = ticket.generation, "Discarding stale source resolution");
            return;
        }
        match result {
            Ok(source) => {
                let token = self.transport.current().load(source);
                if let Some(pending) = self.pending.as_mut() {
                    pending.deck_token = Some(token);
                }
                self.spawn_timer(self.settings.canplay_timeout(), SessionEvent::CanPlayTimeout { ticket });
            }
            Err(e) => self.fail_load(track_id, e),
        }
    }

    fn on_can_play(&mut self, token: u64, duration_secs: f64) {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|p| p.deck_token == Some(token));
        if !matches {
            debug!(token, "Ignoring can-play for a superseded load");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.guard.finish(&pending.ticket);

        let deck = Arc::clone(self.transport.current());
        if let Some(position) = pending.resume_at {
            deck.seek(position);
        }
        if pending.autoplay {
            deck.play();
            self.state.is_playing = true;
            self.set_lifecycle(PlaybackLifecycle::Playing);
            info!(track_id = %pending.track_id, duration = duration_secs, "Track started");
            self.emit(TempoEvent::TrackStarted {
                track_id: pending.track_id.as_uuid(),
                queue_index: self.state.queue_index,
                via_crossfade: false,
                timestamp: Utc::now(),
            });
        } else {
            deck.pause();
            self.set_lifecycle(PlaybackLifecycle::Paused);
            debug!(track_id = %pending.track_id, "Track ready (paused)");
        }
    }

    fn on_canplay_timeout(&mut self, ticket: LoadTicket) {
        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        if pending.ticket != ticket {
            return;
        }
        let (track_id, autoplay) = (pending.track_id, pending.autoplay);
        self.guard.finish(&ticket);

        let error = Error::Timeout(format!(
            "not ready after {} ms, starting anyway",
            self.settings.canplay_timeout_ms
        ));
        warn!(track_id = %track_id, "Can-play wait timed out");
        self.report_track_problem(track_id, &error);
        if autoplay {
            self.transport.current().play();
        }
    }

    /// Report a track that could not be played; the session stays usable
    fn fail_load(&mut self, track_id: TrackId, error: Error) {
        warn!(track_id = %track_id, "Track failed: {}", error);
        if let Some(pending) = self.pending.take() {
            self.guard.finish(&pending.ticket);
        }
        self.transport.current().reset();
        self.state.is_playing = false;
        self.set_lifecycle(PlaybackLifecycle::Idle);
        self.report_track_problem(track_id, &error);
        self.dirty = true;
    }

    /// Notify listeners about a track that could not be played cleanly
    ///
    /// Failures the track plays through surface as `TrackWarning`, the rest as
    /// `TrackFailed`. Engine faults are logged only.
    fn report_track_problem(&self, track_id: TrackId, error: &Error) {
        if !error.is_track_failure() {
            warn!(track_id = %track_id, "Engine error while loading track: {}", error);
            return;
        }
        let event = if error.plays_anyway() {
            TempoEvent::TrackWarning {
                track_id: track_id.as_uuid(),
                message: error.to_string(),
                timestamp: Utc::now(),
            }
        } else {
            TempoEvent::TrackFailed {
                track_id: track_id.as_uuid(),
                reason: error.to_string(),
                timestamp: Utc::now(),
            }
        };
        self.emit(event);
    }

    // ----- deck events -----

    fn on_deck_event(&mut self, event: DeckEvent) {
        if event.output == self.transport.current().id() {
            self.on_current_deck_event(event.kind);
        } else if self.transport.incoming().map(|d| d.id()) == Some(event.output) {
            self.on_incoming_deck_event(event.kind);
        } else {
            debug!(output = %event.output, "Event from retired deck dropped");
        }
    }

    fn on_current_deck_event(&mut self, kind: DeckEventKind) {
        match kind {
            DeckEventKind::CanPlay { token, duration_secs } => self.on_can_play(token, duration_secs),
            DeckEventKind::Error { token, message } => {
                let failed = self
                    .pending
                    .as_ref()
                    .filter(|p| p.deck_token == Some(token))
                    .map(|p| p.track_id);
                match failed {
                    Some(track_id) => self.fail_load(track_id, Error::Decode(message)),
                    None => debug!(token, "Ignoring error for a superseded load"),
                }
            }
            DeckEventKind::Waiting => {
                if self.state.is_playing {
                    self.set_lifecycle(PlaybackLifecycle::Buffering);
                }
            }
            DeckEventKind::TimeUpdate { position_secs } => {
                self.emit_position(position_secs);
                self.maybe_start_crossfade(position_secs);
            }
            DeckEventKind::Ended => {
                if let Some(cf) = self.transport.crossfade_mut() {
                    cf.outgoing_ended = true;
                    let fading = cf.is_fading();
                    debug!(crossfade = cf.id, fading, "Outgoing track ended during crossfade");
                    if fading {
                        self.complete_crossfade(false);
                    }
                } else {
                    self.on_track_ended();
                }
            }
        }
    }

    fn on_track_ended(&mut self) {
        let deck = Arc::clone(self.transport.current());
        if self.state.repeat == RepeatMode::One {
            debug!(track_id = ?self.state.current_track_id, "Repeat one, restarting");
            deck.seek(0.0);
            deck.play();
            if let Some(track_id) = self.state.current_track_id {
                self.emit(TempoEvent::TrackStarted {
                    track_id: track_id.as_uuid(),
                    queue_index: self.state.queue_index,
                    via_crossfade: false,
                    timestamp: Utc::now(),
                });
            }
            return;
        }

        if !self.settings.autoplay {
            self.finish_playback();
            return;
        }
        match next_index(&self.state, &mut self.rng) {
            NextIndex::Index(index) => {
                if !self.advance_to(index, LoadOrigin::AutoAdvance) {
                    debug!(index, "Auto-advance dropped");
                }
            }
            NextIndex::EndOfQueue => self.finish_playback(),
        }
    }

    fn finish_playback(&mut self) {
        info!("Playback ended");
        self.state.is_playing = false;
        self.set_lifecycle(PlaybackLifecycle::Ended);
        self.dirty = true;
    }

    fn stop_at_end_of_queue(&mut self) {
        info!("End of queue");
        let deck = Arc::clone(self.transport.current());
        deck.pause();
        self.state.is_playing = false;
        if let Some(pending) = self.pending.as_mut() {
            pending.autoplay = false;
        }
        if deck.is_ready() {
            self.set_lifecycle(PlaybackLifecycle::Paused);
        }
        self.dirty = true;
    }

    fn restart_current(&mut self) {
        match self.pending.as_mut() {
            Some(pending) => pending.resume_at = None,
            None => self.transport.current().seek(0.0),
        }
        self.dirty = true;
    }

    fn pause(&mut self) {
        let fading = self.transport.crossfade().map(|cf| cf.is_fading());
        match fading {
            Some(true) => self.complete_crossfade(true),
            Some(false) => {
                self.cancel_crossfade("paused");
            }
            None => {}
        }
        self.transport.current().pause();
        self.state.is_playing = false;
        if let Some(pending) = self.pending.as_mut() {
            pending.autoplay = false;
        }
        self.set_lifecycle(PlaybackLifecycle::Paused);
        self.dirty = true;
    }

    fn resume(&mut self) {
        self.state.is_playing = true;
        self.dirty = true;
        if let Some(pending) = self.pending.as_mut() {
            pending.autoplay = true;
            self.set_lifecycle(PlaybackLifecycle::Buffering);
            return;
        }

        let deck = Arc::clone(self.transport.current());
        if deck.is_ready() {
            deck.play();
            self.set_lifecycle(PlaybackLifecycle::Playing);
        } else if let Some(track_id) = self.state.current_track_id {
            // nothing loaded, e.g. after a failed load
            if let Some(ticket) = self.guard.begin(LoadOrigin::User) {
                self.launch_load(ticket, track_id, true, None);
            }
        }
    }

    // ----- crossfade -----

    fn maybe_start_crossfade(&mut self, position_secs: f64) {
        if !self.settings.crossfade_enabled()
            || self.pending.is_some()
            || self.lifecycle != PlaybackLifecycle::Playing
        {
            return;
        }
        let deck = Arc::clone(self.transport.current());
        if self.crossfade_blocked == Some((deck.id(), deck.load_token())) {
            return;
        }
        let Some(duration_secs) = deck.duration() else {
            return;
        };
        let check = TriggerCheck {
            fade_secs: self.settings.crossfade_seconds,
            transitioning: self.transport.is_transitioning(),
            repeat: self.state.repeat,
            playing: self.state.is_playing && deck.is_playing(),
            position_secs,
            duration_secs,
        };
        if !should_trigger(&check) {
            return;
        }
        let NextIndex::Index(index) = next_index(&self.state, &mut self.rng) else {
            return;
        };
        let Some(track_id) = self.state.queue.get(index).copied() else {
            return;
        };

        let incoming = Deck::new(self.mixer.sample_rate());
        incoming.attach_listener(self.deck_tx.clone());
        incoming.set_volume_immediate(0.0);
        incoming.set_rate(self.state.speed as f32);
        self.registry.get_or_create(&incoming);
        self.mixer.attach(Arc::clone(&incoming));

        let session = CrossfadeSession::new(
            deck,
            incoming,
            CrossfadeTarget { index, track_id },
            self.settings.crossfade_seconds,
            self.settings.crossfade_curve,
        );
        let id = session.id;
        self.transport = Transport::Transitioning(session);
        self.publish_graphs();

        let from = self.state.current_track_id.map(|t| t.as_uuid()).unwrap_or_default();
        info!(crossfade = id, to = %track_id, fade = self.settings.crossfade_seconds, "Crossfade started");
        self.emit(TempoEvent::CrossfadeStarted {
            from_track_id: from,
            to_track_id: track_id.as_uuid(),
            fade_secs: self.settings.crossfade_seconds,
            timestamp: Utc::now(),
        });

        let track = self.catalog.get_track_by_id(track_id);
        let resolver = Arc::clone(&self.resolver);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match track {
                Some(track) => resolver.resolve(&track).await,
                None => Err(Error::SourceUnavailable {
                    track_id,
                    reason: "not in catalog".to_string(),
                }),
            };
            let _ = tx.send(SessionEvent::CrossfadeResolved { id, result });
        });
    }

    fn on_crossfade_resolved(&mut self, id: u64, result: Result<ResolvedSource>) {
        let timeout = self.settings.canplay_timeout();
        let Some(cf) = self.transport.crossfade_mut() else {
            return;
        };
        if cf.id != id || cf.phase != CrossfadePhase::Resolving {
            debug!(crossfade = id, "Discarding stale crossfade resolution");
            return;
        }
        match result {
            Ok(source) => {
                let token = cf.incoming.load(source);
                cf.phase = CrossfadePhase::Decoding { token };
                self.spawn_timer(timeout, SessionEvent::CrossfadeCanPlayTimeout { id });
            }
            Err(e) => self.abort_crossfade(Error::Crossfade(e.to_string())),
        }
    }

    fn on_incoming_deck_event(&mut self, kind: DeckEventKind) {
        let Some(phase) = self.transport.crossfade().map(|cf| cf.phase) else {
            return;
        };
        match kind {
            DeckEventKind::CanPlay { token, .. } if phase == (CrossfadePhase::Decoding { token }) => {
                self.begin_fading();
            }
            DeckEventKind::Error { token, message } if phase == (CrossfadePhase::Decoding { token }) => {
                self.abort_crossfade(Error::Crossfade(message));
            }
            _ => {}
        }
    }

    fn on_crossfade_canplay_timeout(&mut self, id: u64) {
        let Some(cf) = self.transport.crossfade() else {
            return;
        };
        if cf.id != id || !matches!(cf.phase, CrossfadePhase::Decoding { .. }) {
            return;
        }
        let track_id = cf.target.track_id;
        warn!(crossfade = id, track_id = %track_id, "Next track not ready, fading anyway");
        let error = Error::Timeout(format!(
            "not ready after {} ms, crossfading anyway",
            self.settings.canplay_timeout_ms
        ));
        self.report_track_problem(track_id, &error);
        self.begin_fading();
    }

    fn begin_fading(&mut self) {
        let step = self.settings.crossfade_step();
        let tx = self.internal_tx.clone();
        let Some(cf) = self.transport.crossfade_mut() else {
            return;
        };
        let steps = step_count(cf.fade_secs, step);
        cf.phase = CrossfadePhase::Fading { step: 0, steps };
        cf.incoming.set_volume_immediate(0.0);
        cf.incoming.play();

        let id = cf.id;
        cf.timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(step);
            interval.tick().await;
            for _ in 0..steps {
                interval.tick().await;
                if tx.send(SessionEvent::CrossfadeStep { id }).is_err() {
                    break;
                }
            }
        }));
        debug!(crossfade = id, steps, step_ms = step.as_millis() as u64, "Fading");

        if cf.outgoing_ended {
            self.complete_crossfade(false);
        }
    }

    fn on_crossfade_step(&mut self, id: u64) {
        let volume = self.state.volume;
        let Some(cf) = self.transport.crossfade_mut() else {
            return;
        };
        if cf.id != id {
            return;
        }
        let CrossfadePhase::Fading { step, steps } = cf.phase else {
            return;
        };
        let step = (step + 1).min(steps);
        cf.phase = CrossfadePhase::Fading { step, steps };
        let (out_gain, in_gain) = step_gains(cf.curve, volume, step, steps);
        cf.outgoing.set_volume(out_gain);
        cf.incoming.set_volume(in_gain);
        if step >= steps {
            self.complete_crossfade(false);
        }
    }

    /// Promote the incoming deck and retire the outgoing one
    fn complete_crossfade(&mut self, paused: bool) {
        let Some(incoming) = self.transport.incoming().cloned() else {
            return;
        };
        let previous = std::mem::replace(&mut self.transport, Transport::Single(Arc::clone(&incoming)));
        let Transport::Transitioning(mut cf) = previous else {
            return;
        };
        cf.stop_timer();
        let target = cf.target;
        let outgoing = Arc::clone(&cf.outgoing);
        drop(cf);

        outgoing.pause();
        outgoing.dispose();
        self.mixer.detach(outgoing.id());

        incoming.attach_listener(self.deck_tx.clone());
        incoming.set_volume(self.state.volume);
        if paused {
            incoming.pause();
        }

        let index = if self.state.queue.get(target.index) == Some(&target.track_id) {
            Some(target.index)
        } else {
            self.state.position_of(target.track_id)
        };
        match index {
            Some(index) => {
                self.state.select(index);
            }
            None => {
                self.state.current_track_id = Some(target.track_id);
                self.state.queue_index = None;
            }
        }
        self.publish_graphs();

        info!(track_id = %target.track_id, paused, "Crossfade completed");
        self.emit(TempoEvent::CrossfadeCompleted {
            track_id: target.track_id.as_uuid(),
            timestamp: Utc::now(),
        });
        self.emit(TempoEvent::TrackStarted {
            track_id: target.track_id.as_uuid(),
            queue_index: self.state.queue_index,
            via_crossfade: true,
            timestamp: Utc::now(),
        });
        self.emit_queue_changed();
        self.state.is_playing = !paused;
        self.set_lifecycle(if paused {
            PlaybackLifecycle::Paused
        } else {
            PlaybackLifecycle::Playing
        });
        self.dirty = true;

        if !paused && incoming.has_ended() {
            self.on_track_ended();
        }
    }

    /// Tear down the incoming deck and give the outgoing one its volume back
    ///
    /// Returns the abandoned target and whether the outgoing track had
    /// already ended.
    fn unwind_crossfade(&mut self) -> Option<(CrossfadeTarget, bool)> {
        let outgoing = self.transport.crossfade().map(|cf| Arc::clone(&cf.outgoing))?;
        let previous = std::mem::replace(&mut self.transport, Transport::Single(Arc::clone(&outgoing)));
        let Transport::Transitioning(mut cf) = previous else {
            return None;
        };
        cf.stop_timer();
        cf.incoming.dispose();
        self.mixer.detach(cf.incoming.id());
        outgoing.set_volume(self.state.volume);
        let result = (cf.target, cf.outgoing_ended);
        drop(cf);
        self.publish_graphs();
        Some(result)
    }

    /// Next-track preload failed: report it and fall back to a plain switch
    fn abort_crossfade(&mut self, error: Error) {
        let Some((target, outgoing_ended)) = self.unwind_crossfade() else {
            return;
        };
        let deck = Arc::clone(self.transport.current());
        self.crossfade_blocked = Some((deck.id(), deck.load_token()));

        let reason = error.to_string();
        warn!(track_id = %target.track_id, "Crossfade aborted: {}", reason);
        self.report_track_problem(target.track_id, &error);
        self.emit(TempoEvent::CrossfadeAborted {
            from_track_id: self.state.current_track_id.map(|t| t.as_uuid()).unwrap_or_default(),
            to_track_id: target.track_id.as_uuid(),
            reason,
            timestamp: Utc::now(),
        });

        if outgoing_ended {
            self.on_track_ended();
        }
    }

    /// User action superseded the crossfade; returns whether the outgoing
    /// track had already ended, if a crossfade was running
    fn cancel_crossfade(&mut self, reason: &str) -> Option<bool> {
        let (target, outgoing_ended) = self.unwind_crossfade()?;
        info!(track_id = %target.track_id, reason, "Crossfade cancelled");
        self.emit(TempoEvent::CrossfadeAborted {
            from_track_id: self.state.current_track_id.map(|t| t.as_uuid()).unwrap_or_default(),
            to_track_id: target.track_id.as_uuid(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Some(outgoing_ended)
    }

    // ----- helpers -----

    fn ensure_graph(&self, deck: &Deck) {
        self.registry.get_or_create(deck);
        self.publish_graphs();
    }

    fn publish_graphs(&self) {
        self.graph_feed.send_replace(self.transport.graphs());
    }

    fn spawn_timer(&self, delay: Duration, event: SessionEvent) {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    fn set_lifecycle(&mut self, new_state: PlaybackLifecycle) {
        if self.lifecycle == new_state {
            return;
        }
        let old_state = std::mem::replace(&mut self.lifecycle, new_state);
        debug!(old = %old_state, new = %new_state, "Lifecycle changed");
        self.emit(TempoEvent::LifecycleChanged {
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: TempoEvent) {
        self.bus.emit_lossy(event);
    }

    fn emit_queue_changed(&self) {
        self.emit(TempoEvent::QueueChanged {
            queue: self.state.queue.iter().map(|id| id.as_uuid()).collect(),
            queue_index: self.state.queue_index,
            timestamp: Utc::now(),
        });
    }

    fn emit_mode_changed(&self) {
        self.emit(TempoEvent::ModeChanged {
            shuffle: self.state.shuffle,
            repeat: self.state.repeat,
            timestamp: Utc::now(),
        });
    }

    fn emit_position(&self, position_secs: f64) {
        let Some(track_id) = self.state.current_track_id else {
            return;
        };
        self.emit(TempoEvent::PositionUpdate {
            track_id: track_id.as_uuid(),
            position_secs,
            duration_secs: self.transport.current().duration().unwrap_or(0.0),
            timestamp: Utc::now(),
        });
    }
}
