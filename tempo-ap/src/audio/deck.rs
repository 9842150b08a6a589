//! Output path ("deck")
//!
//! A deck owns one loaded track: decoded audio, a read position, the
//! play/pause flag, volume and playback rate. Loading decodes on the
//! blocking pool and reports back through events. Lifecycle events go to at
//! most one listener over a channel, so they may be produced on the render
//! thread and consumed on the control task.

use super::decode::{decode_bytes, DecodedAudio};
use super::gain::GainNode;
use super::graph::{AudioGraph, OutputId};
use crate::error::Error;
use crate::source::ResolvedSource;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Fraction of a second between time updates
const TIME_UPDATES_PER_SEC: usize = 4;

pub const MIN_RATE: f32 = 0.25;
pub const MAX_RATE: f32 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub enum DeckEventKind {
    /// Load identified by `token` decoded and can start
    CanPlay { token: u64, duration_secs: f64 },
    /// Play was requested before data was ready
    Waiting,
    /// Periodic position report while rendering (and after seeks)
    TimeUpdate { position_secs: f64 },
    /// Playback ran off the end
    Ended,
    /// Load identified by `token` failed
    Error { token: u64, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeckEvent {
    pub output: OutputId,
    pub kind: DeckEventKind,
}

pub type DeckListener = mpsc::UnboundedSender<DeckEvent>;

#[derive(Debug)]
struct DeckState {
    audio: Option<Arc<DecodedAudio>>,
    loading: bool,
    /// Read position in frames (fractional while rate != 1)
    position: f64,
    playing: bool,
    rate: f64,
    token: u64,
    ended: bool,
    frames_since_update: usize,
    disposed: bool,
}

pub struct Deck {
    id: OutputId,
    sample_rate: u32,
    state: Mutex<DeckState>,
    volume: GainNode,
    graph: OnceCell<Arc<AudioGraph>>,
    listener: Mutex<Option<DeckListener>>,
}

impl Deck {
    /// New, empty deck rendering at `sample_rate`
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            id: OutputId::next(),
            sample_rate,
            state: Mutex::new(DeckState {
                audio: None,
                loading: false,
                position: 0.0,
                playing: false,
                rate: 1.0,
                token: 0,
                ended: false,
                frames_since_update: 0,
                disposed: false,
            }),
            volume: GainNode::new(1.0, sample_rate),
            graph: OnceCell::new(),
            listener: Mutex::new(None),
        })
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    // ----- graph wiring -----

    /// Graph wired to this deck, if any
    pub fn graph(&self) -> Option<Arc<AudioGraph>> {
        self.graph.get().cloned()
    }

    /// Wire `graph` unless one is already wired; returns the wired graph
    pub(crate) fn wire_graph(&self, graph: Arc<AudioGraph>) -> Arc<AudioGraph> {
        self.graph.get_or_init(|| graph).clone()
    }

    // ----- listeners -----

    /// Route events to `listener`, replacing any previous one
    pub fn attach_listener(&self, listener: DeckListener) {
        *self.lock_listener() = Some(listener);
    }

    pub fn detach_listener(&self) {
        self.lock_listener().take();
    }

    pub fn has_listener(&self) -> bool {
        self.lock_listener().is_some()
    }

    fn emit(&self, kind: DeckEventKind) {
        if let Some(listener) = self.lock_listener().as_ref() {
            let _ = listener.send(DeckEvent {
                output: self.id,
                kind,
            });
        }
    }

    // ----- loading -----

    /// Start decoding `source`; returns the load token
    ///
    /// Any previous audio is dropped immediately. When decoding completes a
    /// `CanPlay` or `Error` event carrying the token is emitted, unless the
    /// deck was loaded again, reset or disposed in the meantime.
    pub fn load(self: &Arc<Self>, source: ResolvedSource) -> u64 {
        let token = {
            let mut state = self.lock_state();
            state.token += 1;
            state.audio = None;
            state.loading = true;
            state.position = 0.0;
            state.ended = false;
            state.frames_since_update = 0;
            state.token
        };

        debug!(output = %self.id, track_id = %source.track_id, token, "Loading");
        let weak: Weak<Deck> = Arc::downgrade(self);
        let rate = self.sample_rate;
        tokio::spawn(async move {
            let ResolvedSource {
                bytes, format_hint, ..
            } = source;
            let result = tokio::task::spawn_blocking(move || decode_bytes(bytes, format_hint.as_deref(), rate))
                .await
                .unwrap_or_else(|e| Err(Error::Internal(format!("decode task failed: {}", e))));
            if let Some(deck) = weak.upgrade() {
                deck.finish_load(token, result);
            }
        });
        token
    }

    fn finish_load(&self, token: u64, result: crate::Result<DecodedAudio>) {
        let kind = {
            let mut state = self.lock_state();
            if state.token != token || state.disposed {
                debug!(output = %self.id, token, current = state.token, "Discarding stale decode");
                return;
            }
            state.loading = false;
            match result {
                Ok(audio) => {
                    let frames = audio.frames() as f64;
                    let duration_secs = audio.duration_secs();
                    state.position = state.position.min(frames);
                    state.audio = Some(Arc::new(audio));
                    DeckEventKind::CanPlay { token, duration_secs }
                }
                Err(e) => {
                    warn!(output = %self.id, token, "Load failed: {}", e);
                    DeckEventKind::Error {
                        token,
                        message: e.to_string(),
                    }
                }
            }
        };
        self.emit(kind);
    }

    pub fn load_token(&self) -> u64 {
        self.lock_state().token
    }

    /// Decoded audio is present
    pub fn is_ready(&self) -> bool {
        self.lock_state().audio.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_state().loading
    }

    // ----- transport -----

    /// Start or resume rendering
    ///
    /// Playing from the end restarts at 0. Before data is ready the flag is
    /// still set (rendering starts once decoding lands) and `Waiting` is
    /// emitted.
    pub fn play(&self) {
        let waiting = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            if state.ended {
                state.position = 0.0;
                state.ended = false;
            }
            state.playing = true;
            state.audio.is_none()
        };
        if waiting {
            self.emit(DeckEventKind::Waiting);
        }
    }

    pub fn pause(&self) {
        self.lock_state().playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.lock_state().playing
    }

    pub fn has_ended(&self) -> bool {
        self.lock_state().ended
    }

    /// Move the read position, clamped to the loaded duration
    pub fn seek(&self, secs: f64) {
        let position_secs = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            let mut frames = secs.max(0.0) * self.sample_rate as f64;
            if let Some(audio) = &state.audio {
                frames = frames.min(audio.frames() as f64);
            }
            state.position = frames;
            state.ended = false;
            state.frames_since_update = 0;
            frames / self.sample_rate as f64
        };
        self.emit(DeckEventKind::TimeUpdate { position_secs });
    }

    pub fn current_time(&self) -> f64 {
        self.lock_state().position / self.sample_rate as f64
    }

    /// Duration of the loaded audio
    pub fn duration(&self) -> Option<f64> {
        self.lock_state().audio.as_ref().map(|a| a.duration_secs())
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set_gain(volume.clamp(0.0, 1.0));
    }

    /// Set volume without ramping (for a deck that is not yet audible)
    pub fn set_volume_immediate(&self, volume: f32) {
        self.volume.set_gain_immediate(volume.clamp(0.0, 1.0));
    }

    /// Target volume
    pub fn volume(&self) -> f32 {
        self.volume.gain()
    }

    pub fn set_rate(&self, rate: f32) {
        self.lock_state().rate = rate.clamp(MIN_RATE, MAX_RATE) as f64;
    }

    pub fn rate(&self) -> f32 {
        self.lock_state().rate as f32
    }

    /// Stop and unload; any in-flight decode is discarded
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.token += 1;
        state.audio = None;
        state.loading = false;
        state.playing = false;
        state.position = 0.0;
        state.ended = false;
        state.frames_since_update = 0;
    }

    /// Pause, reset, detach listeners and refuse further use
    pub fn dispose(&self) {
        self.reset();
        self.lock_state().disposed = true;
        self.detach_listener();
        debug!(output = %self.id, "Deck disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    // ----- rendering -----

    /// Render one block and add it into `out` (interleaved stereo)
    ///
    /// `scratch` is a reusable work buffer. Returns true if the deck
    /// contributed audio.
    pub fn render(&self, out: &mut [f32], scratch: &mut Vec<f32>) -> bool {
        let frames_out = out.len() / 2;
        let mut events = Vec::new();
        {
            let mut state = self.lock_state();
            let audio = match (&state.audio, state.playing) {
                (Some(audio), true) => Arc::clone(audio),
                _ => return false,
            };

            scratch.clear();
            scratch.resize(frames_out * 2, 0.0);
            let total = audio.frames() as f64;
            let mut rendered = 0;
            for frame in scratch.chunks_exact_mut(2) {
                if state.position >= total {
                    break;
                }
                let index = state.position.floor();
                let frac = (state.position - index) as f32;
                let (l0, r0) = audio.frame(index as usize);
                let (l1, r1) = audio.frame(index as usize + 1);
                frame[0] = l0 + (l1 - l0) * frac;
                frame[1] = r0 + (r1 - r0) * frac;
                state.position += state.rate;
                rendered += 1;
            }

            state.frames_since_update += rendered;
            let update_every = self.sample_rate as usize / TIME_UPDATES_PER_SEC;
            let finished = state.position >= total;
            if finished {
                state.position = total;
            }
            if state.frames_since_update >= update_every || finished {
                state.frames_since_update = 0;
                events.push(DeckEventKind::TimeUpdate {
                    position_secs: state.position / self.sample_rate as f64,
                });
            }
            if finished {
                state.playing = false;
                state.ended = true;
                events.push(DeckEventKind::Ended);
            }
        }

        // the analysis tap sees the source before the user volume
        if let Some(graph) = self.graph.get() {
            graph.process(scratch);
        }
        self.volume.process(scratch);
        for (o, s) in out.iter_mut().zip(scratch.iter()) {
            *o += *s;
        }

        for kind in events {
            self.emit(kind);
        }
        true
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DeckState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<DeckListener>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::graph::{GraphRegistry, ProcessingContext};
    use crate::catalog::TrackId;
    use crate::source::SourceOrigin;
    use std::io::Cursor;
    use std::time::Duration;

    const RATE: u32 = 8000;

    fn wav_source(seconds: f32) -> ResolvedSource {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..(RATE as f32 * seconds) as usize {
                writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
            }
            writer.finalize().unwrap();
        }
        ResolvedSource {
            track_id: TrackId::new(),
            bytes: cursor.into_inner().into(),
            format_hint: Some("wav".to_string()),
            origin: SourceOrigin::Memory,
        }
    }

    async fn next_kind(rx: &mut mpsc::UnboundedReceiver<DeckEvent>) -> DeckEventKind {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("deck event")
            .expect("channel open")
            .kind
    }

    #[tokio::test]
    async fn load_emits_can_play_with_token() {
        let deck = Deck::new(RATE);
        let (tx, mut rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);

        let token = deck.load(wav_source(1.0));
        match next_kind(&mut rx).await {
            DeckEventKind::CanPlay { token: t, duration_secs } => {
                assert_eq!(t, token);
                assert!((duration_secs - 1.0).abs() < 1e-3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(deck.is_ready());
    }

    #[tokio::test]
    async fn reload_discards_first_decode() {
        let deck = Deck::new(RATE);
        let (tx, mut rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);

        deck.load(wav_source(1.0));
        let second = deck.load(wav_source(2.0));
        match next_kind(&mut rx).await {
            DeckEventKind::CanPlay { token, duration_secs } => {
                assert_eq!(token, second);
                assert!((duration_secs - 2.0).abs() < 1e-3);
            }
            other => panic!("unexpected {other:?}"),
        }
        // nothing else arrives for the superseded load
        assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn garbage_reports_error() {
        let deck = Deck::new(RATE);
        let (tx, mut rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);
        let mut source = wav_source(0.1);
        source.bytes = vec![1u8; 64].into();

        let token = deck.load(source);
        assert!(matches!(next_kind(&mut rx).await, DeckEventKind::Error { token: t, .. } if t == token));
    }

    #[tokio::test]
    async fn render_advances_and_ends() {
        let deck = Deck::new(RATE);
        let (tx, mut rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);
        deck.load(wav_source(0.5));
        next_kind(&mut rx).await;

        deck.play();
        let mut out = vec![0.0f32; 2 * 2000];
        let mut scratch = Vec::new();
        assert!(deck.render(&mut out, &mut scratch));
        assert!((deck.current_time() - 0.25).abs() < 1e-6);
        assert!(matches!(next_kind(&mut rx).await, DeckEventKind::TimeUpdate { .. }));

        for _ in 0..2 {
            deck.render(&mut out, &mut scratch);
        }
        let mut saw_end = false;
        while let Ok(ev) = rx.try_recv() {
            saw_end |= ev.kind == DeckEventKind::Ended;
        }
        assert!(saw_end);
        assert!(!deck.is_playing());
        assert!(deck.has_ended());
    }

    #[tokio::test]
    async fn muted_deck_still_feeds_the_analysis_tap() {
        let deck = Deck::new(RATE);
        let registry = GraphRegistry::with_fft_size(Arc::new(ProcessingContext::new(RATE)), 256);
        let graph = registry.get_or_create(&deck);
        let (tx, mut rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);
        deck.load(wav_source(1.0));
        next_kind(&mut rx).await;

        deck.set_volume_immediate(0.0);
        deck.play();
        let mut out = vec![0.0f32; 2 * 512];
        assert!(deck.render(&mut out, &mut Vec::new()));
        assert!(out.iter().all(|s| *s == 0.0));

        let mut waveform = vec![0u8; 128];
        graph.analysis().get_byte_time_domain_data(&mut waveform);
        assert!(waveform.iter().any(|b| *b != 128));
    }

    #[tokio::test]
    async fn rate_scales_position() {
        let deck = Deck::new(RATE);
        let (tx, mut rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);
        deck.load(wav_source(1.0));
        next_kind(&mut rx).await;

        deck.set_rate(2.0);
        deck.play();
        let mut out = vec![0.0f32; 2 * 800];
        deck.render(&mut out, &mut Vec::new());
        assert!((deck.current_time() - 0.2).abs() < 1e-6);

        deck.set_rate(99.0);
        assert_eq!(deck.rate(), MAX_RATE);
    }

    #[tokio::test]
    async fn seek_clamps_to_duration() {
        let deck = Deck::new(RATE);
        let (tx, mut rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);
        deck.load(wav_source(1.0));
        next_kind(&mut rx).await;

        deck.seek(30.0);
        assert!((deck.current_time() - 1.0).abs() < 1e-6);
        deck.seek(-4.0);
        assert_eq!(deck.current_time(), 0.0);
    }

    #[test]
    fn play_before_load_waits() {
        let deck = Deck::new(RATE);
        let (tx, mut rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);
        deck.play();
        assert!(deck.is_playing());
        assert_eq!(rx.try_recv().unwrap().kind, DeckEventKind::Waiting);
    }

    #[test]
    fn dispose_detaches_listener() {
        let deck = Deck::new(RATE);
        let (tx, _rx) = mpsc::unbounded_channel();
        deck.attach_listener(tx);
        deck.dispose();
        assert!(!deck.has_listener());
        assert!(deck.is_disposed());
        deck.play();
        assert!(!deck.is_playing());
    }
}
