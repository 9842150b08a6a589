//! Sums every attached deck into the output block
//!
//! Normally one deck is attached; during a crossfade two are, which is the
//! only time two paths are audible together.

use super::deck::Deck;
use super::graph::{OutputId, ProcessingContext};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Frames rendered per block by [`Mixer::render_for`]
pub const RENDER_BLOCK_FRAMES: usize = 512;

pub struct Mixer {
    context: Arc<ProcessingContext>,
    decks: RwLock<Vec<Arc<Deck>>>,
    scratch: Mutex<Vec<f32>>,
}

impl Mixer {
    pub fn new(context: Arc<ProcessingContext>) -> Self {
        Self {
            context,
            decks: RwLock::new(Vec::new()),
            scratch: Mutex::new(Vec::with_capacity(RENDER_BLOCK_FRAMES * 2)),
        }
    }

    pub fn context(&self) -> &Arc<ProcessingContext> {
        &self.context
    }

    pub fn sample_rate(&self) -> u32 {
        self.context.sample_rate()
    }

    pub fn attach(&self, deck: Arc<Deck>) {
        let mut decks = self.decks.write().unwrap_or_else(|e| e.into_inner());
        if !decks.iter().any(|d| d.id() == deck.id()) {
            debug!(output = %deck.id(), "Deck attached to mixer");
            decks.push(deck);
        }
    }

    pub fn detach(&self, id: OutputId) -> bool {
        let mut decks = self.decks.write().unwrap_or_else(|e| e.into_inner());
        let before = decks.len();
        decks.retain(|d| d.id() != id);
        before != decks.len()
    }

    pub fn contains(&self, id: OutputId) -> bool {
        self.decks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|d| d.id() == id)
    }

    pub fn deck_count(&self) -> usize {
        self.decks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Render one block of interleaved stereo into `out`
    ///
    /// Emits silence (and advances nothing) while the context is suspended.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        if !self.context.is_running() {
            return;
        }
        let decks: Vec<Arc<Deck>> = self.decks.read().unwrap_or_else(|e| e.into_inner()).clone();
        let mut scratch = self.scratch.lock().unwrap_or_else(|e| e.into_inner());
        for deck in &decks {
            deck.render(out, &mut scratch);
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    /// Render and discard `secs` worth of audio
    ///
    /// Used by the headless driver and by tests to move playback forward.
    pub fn render_for(&self, secs: f64) {
        let mut remaining = (secs.max(0.0) * self.sample_rate() as f64).round() as usize;
        let mut block = vec![0.0f32; RENDER_BLOCK_FRAMES * 2];
        while remaining > 0 {
            let frames = remaining.min(RENDER_BLOCK_FRAMES);
            self.render(&mut block[..frames * 2]);
            remaining -= frames;
        }
    }
}
