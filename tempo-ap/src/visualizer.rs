//! Visualizer sampler
//!
//! Polls the analysis tap of the current graph and publishes spectrum and
//! waveform bytes. The loop ticks at display rate but only reads the tap
//! once per frame interval, so CPU cost follows the target fps rather than
//! the tick rate. Disabling aborts the loop outright.

use crate::audio::analysis::DEFAULT_FFT_SIZE;
use crate::audio::AudioGraph;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Loop tick, roughly a fast display refresh
pub const TICK_INTERVAL: Duration = Duration::from_micros(8_333);

pub const DEFAULT_FPS: u32 = 30;

/// One sampled frame; both buffers have the same length
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisualFrame {
    pub sequence: u64,
    pub frequency: Vec<u8>,
    pub waveform: Vec<u8>,
}

/// Decides whether enough wall-clock time has passed for another frame
#[derive(Debug, Clone)]
pub struct FrameLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl FrameLimiter {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True (and records `now`) when a frame is due
    pub fn should_sample(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Read one frame from `graph`, or zeros when there is none yet
pub fn sample_frame(graph: Option<&AudioGraph>, sequence: u64) -> VisualFrame {
    let bins = graph
        .map(|g| g.analysis().frequency_bin_count())
        .unwrap_or(DEFAULT_FFT_SIZE / 2);
    let mut frequency = vec![0u8; bins];
    let mut waveform = vec![0u8; bins];
    if let Some(graph) = graph {
        graph.analysis().get_byte_frequency_data(&mut frequency);
        graph.analysis().get_byte_time_domain_data(&mut waveform);
    }
    VisualFrame {
        sequence,
        frequency,
        waveform,
    }
}

pub struct VisualizerSampler {
    feed: watch::Receiver<Vec<Arc<AudioGraph>>>,
    fps: u32,
    frames: watch::Sender<VisualFrame>,
    task: Option<JoinHandle<()>>,
}

impl VisualizerSampler {
    /// Sampler for the first graph on `feed`; not started
    pub fn new(feed: watch::Receiver<Vec<Arc<AudioGraph>>>, fps: u32) -> Self {
        let (frames, _) = watch::channel(VisualFrame::default());
        Self {
            feed,
            fps: fps.max(1),
            frames,
            task: None,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Start the sampling loop; no-op if already running
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let feed = self.feed.clone();
        let frames = self.frames.clone();
        let mut limiter = FrameLimiter::new(self.fps);
        let mut sequence = self.frames.borrow().sequence;
        info!(fps = self.fps, "Visualizer started");

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !limiter.should_sample(Instant::now()) {
                    continue;
                }
                let graph = feed.borrow().first().cloned();
                sequence += 1;
                frames.send_replace(sample_frame(graph.as_deref(), sequence));
            }
        }));
    }

    /// Cancel the sampling loop
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Visualizer stopped");
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn frames(&self) -> watch::Receiver<VisualFrame> {
        self.frames.subscribe()
    }

    pub fn latest(&self) -> VisualFrame {
        self.frames.borrow().clone()
    }
}

impl Drop for VisualizerSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Deck, GraphRegistry, ProcessingContext};

    #[test]
    fn limiter_skips_until_interval_elapses() {
        let mut limiter = FrameLimiter::new(30);
        let start = Instant::now();
        assert!(limiter.should_sample(start));
        assert!(!limiter.should_sample(start + Duration::from_millis(10)));
        assert!(!limiter.should_sample(start + Duration::from_millis(30)));
        assert!(limiter.should_sample(start + Duration::from_millis(34)));
    }

    #[test]
    fn no_graph_gives_zero_buffers() {
        let frame = sample_frame(None, 7);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.frequency.len(), DEFAULT_FFT_SIZE / 2);
        assert_eq!(frame.frequency.len(), frame.waveform.len());
        assert!(frame.frequency.iter().all(|b| *b == 0));
        assert!(frame.waveform.iter().all(|b| *b == 0));
    }

    #[test]
    fn graph_frame_matches_bin_count() {
        let registry = GraphRegistry::with_fft_size(Arc::new(ProcessingContext::new(8000)), 256);
        let deck = Deck::new(8000);
        let graph = registry.get_or_create(&deck);
        let mut block: Vec<f32> = (0..512).map(|i| ((i as f32) * 0.3).sin() * 0.5).collect();
        graph.process(&mut block);

        let frame = sample_frame(Some(&graph), 1);
        assert_eq!(frame.frequency.len(), 128);
        assert_eq!(frame.waveform.len(), 128);
        assert!(frame.frequency.iter().any(|b| *b > 0));
    }

    #[tokio::test]
    async fn disabling_cancels_the_loop() {
        let (_tx, feed) = watch::channel(Vec::new());
        let mut sampler = VisualizerSampler::new(feed, 60);
        let mut frames = sampler.frames();

        sampler.set_enabled(true);
        assert!(sampler.is_running());
        tokio::time::timeout(Duration::from_secs(2), frames.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(frames.borrow().sequence >= 1);

        sampler.set_enabled(false);
        assert!(!sampler.is_running());
        let seen = sampler.latest().sequence;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sampler.latest().sequence, seen);
    }
}
