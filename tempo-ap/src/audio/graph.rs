//! Shared audio graph
//!
//! Each output path gets at most one processing graph for its whole life:
//!
//! ```text
//! deck source → analysis tap → pre-gain → filter stage → post-gain → mixer
//! ```
//!
//! The equalizer owns what goes into the filter stage and the visualizer
//! reads the analysis tap; neither knows about the other. Graphs are handed
//! out by [`GraphRegistry::get_or_create`], which is idempotent per output.

use super::analysis::{AnalysisTap, DEFAULT_FFT_SIZE};
use super::biquad::PeakingFilter;
use super::deck::Deck;
use super::gain::GainNode;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

/// Stable identity of an output path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u64);

impl OutputId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OutputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "output-{}", self.0)
    }
}

/// Render clock shared by every graph and the mixer
///
/// While suspended the mixer emits silence and no playback time passes.
#[derive(Debug)]
pub struct ProcessingContext {
    sample_rate: u32,
    running: AtomicBool,
}

impl ProcessingContext {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            running: AtomicBool::new(true),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn suspend(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!("Processing context suspended");
        }
    }

    pub fn resume(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            debug!("Processing context resumed");
        }
    }
}

/// Slot for a dynamically inserted filter chain (series)
#[derive(Debug, Default)]
pub struct FilterStage {
    chain: Mutex<Option<Vec<PeakingFilter>>>,
}

impl FilterStage {
    /// Insert a chain; returns false if one is already installed
    pub fn install(&self, filters: Vec<PeakingFilter>) -> bool {
        let mut chain = self.lock();
        if chain.is_some() {
            return false;
        }
        *chain = Some(filters);
        true
    }

    /// Remove the chain; the stage becomes a pass-through
    pub fn remove(&self) -> bool {
        self.lock().take().is_some()
    }

    pub fn is_installed(&self) -> bool {
        self.lock().is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ramp filter `index` towards `db`; false if no such filter
    pub fn set_gain_db(&self, index: usize, db: f32) -> bool {
        match self.lock().as_mut().and_then(|c| c.get_mut(index)) {
            Some(filter) => {
                filter.set_gain_db(db);
                true
            }
            None => false,
        }
    }

    /// Target gains of the installed chain, in order
    pub fn gains_db(&self) -> Vec<f32> {
        self.lock()
            .as_ref()
            .map(|c| c.iter().map(PeakingFilter::gain_db).collect())
            .unwrap_or_default()
    }

    pub fn process(&self, frames: &mut [f32]) {
        if let Some(chain) = self.lock().as_mut() {
            for filter in chain.iter_mut() {
                filter.process(frames);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<PeakingFilter>>> {
        self.chain.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Processing graph wired to one output path
pub struct AudioGraph {
    output: OutputId,
    context: Arc<ProcessingContext>,
    analysis: AnalysisTap,
    pre_gain: GainNode,
    filters: FilterStage,
    post_gain: GainNode,
}

impl AudioGraph {
    fn new(output: OutputId, context: Arc<ProcessingContext>, fft_size: usize) -> Self {
        let rate = context.sample_rate();
        Self {
            output,
            analysis: AnalysisTap::new(fft_size),
            pre_gain: GainNode::new(1.0, rate),
            filters: FilterStage::default(),
            post_gain: GainNode::new(1.0, rate),
            context,
        }
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn context(&self) -> &Arc<ProcessingContext> {
        &self.context
    }

    pub fn analysis(&self) -> &AnalysisTap {
        &self.analysis
    }

    pub fn pre_gain(&self) -> &GainNode {
        &self.pre_gain
    }

    pub fn filters(&self) -> &FilterStage {
        &self.filters
    }

    pub fn post_gain(&self) -> &GainNode {
        &self.post_gain
    }

    /// Run one block of interleaved stereo through the graph in place
    pub fn process(&self, frames: &mut [f32]) {
        self.analysis.write(frames);
        self.pre_gain.process(frames);
        self.filters.process(frames);
        self.post_gain.process(frames);
    }
}

static GLOBAL: OnceCell<Arc<GraphRegistry>> = OnceCell::new();

/// Keyed registry guaranteeing one graph per output path
pub struct GraphRegistry {
    context: Arc<ProcessingContext>,
    fft_size: usize,
    graphs: Mutex<HashMap<OutputId, Weak<AudioGraph>>>,
    constructed: AtomicUsize,
}

impl GraphRegistry {
    pub fn new(context: Arc<ProcessingContext>) -> Self {
        Self::with_fft_size(context, DEFAULT_FFT_SIZE)
    }

    pub fn with_fft_size(context: Arc<ProcessingContext>, fft_size: usize) -> Self {
        Self {
            context,
            fft_size,
            graphs: Mutex::new(HashMap::new()),
            constructed: AtomicUsize::new(0),
        }
    }

    /// Install the process-wide registry (first caller wins)
    pub fn init_global(context: Arc<ProcessingContext>) -> Arc<GraphRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(GraphRegistry::new(context)))
            .clone()
    }

    pub fn context(&self) -> &Arc<ProcessingContext> {
        &self.context
    }

    /// Return the deck's graph, building and wiring it on first use
    ///
    /// Always resumes the processing context. Calling this any number of
    /// times for the same deck yields the same graph.
    pub fn get_or_create(&self, deck: &Deck) -> Arc<AudioGraph> {
        self.context.resume();

        let mut graphs = self.graphs.lock().unwrap_or_else(|e| e.into_inner());
        graphs.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = graphs.get(&deck.id()).and_then(Weak::upgrade) {
            return existing;
        }
        if let Some(wired) = deck.graph() {
            graphs.insert(deck.id(), Arc::downgrade(&wired));
            return wired;
        }

        let graph = Arc::new(AudioGraph::new(deck.id(), Arc::clone(&self.context), self.fft_size));
        let wired = deck.wire_graph(Arc::clone(&graph));
        graphs.insert(deck.id(), Arc::downgrade(&wired));
        if Arc::ptr_eq(&wired, &graph) {
            let total = self.constructed.fetch_add(1, Ordering::Relaxed) + 1;
            info!(output = %deck.id(), total, "Audio graph constructed");
        }
        wired
    }

    /// Graphs built over the registry's lifetime
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::Relaxed)
    }

    /// Graphs whose output path is still alive
    pub fn live(&self) -> usize {
        self.graphs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::biquad::OCTAVE_Q;

    #[test]
    fn output_ids_are_unique() {
        let a = OutputId::next();
        let b = OutputId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn init_global_keeps_the_first_registry() {
        let first = GraphRegistry::init_global(Arc::new(ProcessingContext::new(8000)));
        let second = GraphRegistry::init_global(Arc::new(ProcessingContext::new(44100)));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.context().sample_rate(), 8000);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let context = Arc::new(ProcessingContext::new(8000));
        let registry = GraphRegistry::with_fft_size(Arc::clone(&context), 256);
        let deck = Deck::new(8000);

        let first = registry.get_or_create(&deck);
        let second = registry.get_or_create(&deck);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.constructed(), 1);
        assert_eq!(first.output(), deck.id());
    }

    #[test]
    fn graph_already_on_deck_is_reused_by_another_registry() {
        let context = Arc::new(ProcessingContext::new(8000));
        let a = GraphRegistry::with_fft_size(Arc::clone(&context), 256);
        let b = GraphRegistry::with_fft_size(Arc::clone(&context), 256);
        let deck = Deck::new(8000);

        let from_a = a.get_or_create(&deck);
        let from_b = b.get_or_create(&deck);
        assert!(Arc::ptr_eq(&from_a, &from_b));
        assert_eq!(b.constructed(), 0);
    }

    #[test]
    fn get_or_create_resumes_suspended_context() {
        let context = Arc::new(ProcessingContext::new(8000));
        let registry = GraphRegistry::with_fft_size(Arc::clone(&context), 256);
        let deck = Deck::new(8000);
        registry.get_or_create(&deck);

        context.suspend();
        assert!(!context.is_running());
        registry.get_or_create(&deck);
        assert!(context.is_running());
        assert_eq!(registry.constructed(), 1);
    }

    #[test]
    fn dropped_decks_release_their_graphs() {
        let context = Arc::new(ProcessingContext::new(8000));
        let registry = GraphRegistry::with_fft_size(context, 256);
        {
            let deck = Deck::new(8000);
            registry.get_or_create(&deck);
            assert_eq!(registry.live(), 1);
        }
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn filter_stage_install_and_remove() {
        let stage = FilterStage::default();
        assert!(stage.is_empty());
        assert!(stage.install(vec![PeakingFilter::new(1000.0, OCTAVE_Q, 0.0, 8000)]));
        assert!(!stage.install(vec![]));
        assert!(stage.set_gain_db(0, 3.0));
        assert!(!stage.set_gain_db(5, 3.0));
        assert_eq!(stage.gains_db(), vec![3.0]);
        assert!(stage.remove());
        assert!(!stage.is_installed());
    }
}
