//! Parametric equalizer
//!
//! Owns the band gains and materializes them as a chain of peaking filters
//! in the filter stage of every graph it is attached to. Gain changes ramp
//! (≈10 ms) inside the filters. Disabling forces every band's effective gain
//! to 0 dB while keeping the stored values, so re-enabling restores them.

pub mod presets;

pub use presets::Preset;

use crate::audio::biquad::{PeakingFilter, OCTAVE_Q};
use crate::audio::AudioGraph;
use crate::db;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tempo_common::events::{EventBus, TempoEvent};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Octave-spaced band centers
pub const BAND_FREQUENCIES: [f32; 10] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

pub const MIN_GAIN_DB: f32 = -12.0;
pub const MAX_GAIN_DB: f32 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub frequency: f32,
    pub gain_db: f32,
}

/// Persisted equalizer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualizerSettings {
    pub bands: Vec<Band>,
    pub enabled: bool,
    /// `None` once any band was edited by hand
    pub active_preset: Option<String>,
}

impl Default for EqualizerSettings {
    fn default() -> Self {
        Self {
            bands: BAND_FREQUENCIES
                .iter()
                .map(|f| Band {
                    frequency: *f,
                    gain_db: 0.0,
                })
                .collect(),
            enabled: true,
            active_preset: Some(presets::FLAT.to_string()),
        }
    }
}

impl EqualizerSettings {
    /// Gains the filters should run at
    pub fn effective_gains(&self) -> Vec<f32> {
        self.bands
            .iter()
            .map(|b| if self.enabled { b.gain_db } else { 0.0 })
            .collect()
    }

    /// Clamp gains into range; an empty band list becomes the default bands
    pub fn sanitized(mut self) -> Self {
        if self.bands.is_empty() {
            self.bands = EqualizerSettings::default().bands;
        }
        for band in &mut self.bands {
            band.gain_db = clamp_gain(band.gain_db);
        }
        self
    }
}

fn clamp_gain(db: f32) -> f32 {
    if db.is_nan() {
        return 0.0;
    }
    db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
}

pub struct Equalizer {
    settings: EqualizerSettings,
    graphs: Vec<Weak<AudioGraph>>,
    changes: watch::Sender<EqualizerSettings>,
    events: Option<EventBus>,
}

pub type SharedEqualizer = Arc<Mutex<Equalizer>>;

impl Equalizer {
    pub fn new(settings: EqualizerSettings) -> Self {
        let settings = settings.sanitized();
        let (changes, _) = watch::channel(settings.clone());
        Self {
            settings,
            graphs: Vec::new(),
            changes,
            events: None,
        }
    }

    /// Broadcast `EqualizerChanged` on every mutation
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn into_shared(self) -> SharedEqualizer {
        Arc::new(Mutex::new(self))
    }

    pub fn settings(&self) -> &EqualizerSettings {
        &self.settings
    }

    /// Latest settings after every mutation
    pub fn subscribe(&self) -> watch::Receiver<EqualizerSettings> {
        self.changes.subscribe()
    }

    /// Set one band; the stored value is clamped to ±12 dB
    ///
    /// Clears the active preset name.
    ///
    /// # Returns
    /// The gain actually stored
    pub fn set_band_gain(&mut self, index: usize, db: f32) -> Result<f32> {
        let band = self
            .settings
            .bands
            .get_mut(index)
            .ok_or_else(|| Error::NotFound(format!("equalizer band {}", index)))?;
        band.gain_db = clamp_gain(db);
        let stored = band.gain_db;
        self.settings.active_preset = None;
        debug!(index, requested = db, stored, "Band gain set");
        self.changed();
        Ok(stored)
    }

    /// Overwrite all bands with a preset and record its name
    pub fn apply_preset(&mut self, name: &str) -> Result<()> {
        let preset = presets::find(name)
            .ok_or_else(|| Error::NotFound(format!("equalizer preset '{}'", name)))?;
        if preset.gains.len() != self.settings.bands.len() {
            return Err(Error::InvalidState(format!(
                "preset '{}' has {} bands, equalizer has {}",
                preset.name,
                preset.gains.len(),
                self.settings.bands.len()
            )));
        }
        for (band, gain) in self.settings.bands.iter_mut().zip(preset.gains) {
            band.gain_db = clamp_gain(gain);
        }
        self.settings.active_preset = Some(preset.name.to_string());
        info!(preset = preset.name, "Equalizer preset applied");
        self.changed();
        Ok(())
    }

    /// Back to the flat preset
    pub fn reset(&mut self) -> Result<()> {
        self.apply_preset(presets::FLAT)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.settings.enabled != enabled {
            self.settings.enabled = enabled;
            info!(enabled, "Equalizer toggled");
            self.changed();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn effective_gains(&self) -> Vec<f32> {
        self.settings.effective_gains()
    }

    /// Insert this equalizer's filters into `graph`
    ///
    /// Filters are created once per graph; attaching again only resyncs.
    pub fn attach(&mut self, graph: &Arc<AudioGraph>) {
        let rate = graph.context().sample_rate();
        let filters = self
            .settings
            .bands
            .iter()
            .zip(self.settings.effective_gains())
            .map(|(band, gain)| PeakingFilter::new(band.frequency, OCTAVE_Q, gain, rate))
            .collect();
        if graph.filters().install(filters) {
            debug!(output = %graph.output(), "Equalizer filters installed");
        }

        self.graphs.retain(|w| w.strong_count() > 0);
        if !self.graphs.iter().any(|w| w.as_ptr() == Arc::as_ptr(graph)) {
            self.graphs.push(Arc::downgrade(graph));
        }
        self.sync();
    }

    /// Graphs currently carrying this equalizer
    pub fn attached(&self) -> usize {
        self.graphs.iter().filter(|w| w.strong_count() > 0).count()
    }

    fn changed(&mut self) {
        self.sync();
        self.changes.send_replace(self.settings.clone());
        if let Some(bus) = &self.events {
            bus.emit_lossy(TempoEvent::EqualizerChanged {
                enabled: self.settings.enabled,
                active_preset: self.settings.active_preset.clone(),
                gains_db: self.settings.bands.iter().map(|b| b.gain_db).collect(),
                timestamp: Utc::now(),
            });
        }
    }

    fn sync(&mut self) {
        let gains = self.settings.effective_gains();
        self.graphs.retain(|w| w.strong_count() > 0);
        for graph in self.graphs.iter().filter_map(Weak::upgrade) {
            for (index, gain) in gains.iter().enumerate() {
                graph.filters().set_gain_db(index, *gain);
            }
        }
    }
}

/// Attach the equalizer to every graph published on `feed`
pub fn spawn_graph_follower(
    equalizer: SharedEqualizer,
    mut feed: watch::Receiver<Vec<Arc<AudioGraph>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let graphs = feed.borrow_and_update().clone();
            {
                let mut eq = equalizer.lock().unwrap_or_else(|e| e.into_inner());
                for graph in &graphs {
                    eq.attach(graph);
                }
            }
            if feed.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Write settings to the database once changes stop for `debounce`
///
/// Exits (after a final write of any pending change) when the equalizer is
/// dropped.
pub fn spawn_persister(
    pool: SqlitePool,
    mut changes: watch::Receiver<EqualizerSettings>,
    debounce: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(debounce) => break,
                    more = changes.changed() => {
                        if more.is_err() {
                            break;
                        }
                    }
                }
            }
            let settings = changes.borrow_and_update().clone();
            match db::equalizer::save_equalizer(&pool, &settings).await {
                Ok(()) => debug!("Equalizer settings saved"),
                Err(e) => warn!("Failed to save equalizer settings: {}", e),
            }
        }
    })
}
