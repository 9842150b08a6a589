//! Analysis tap
//!
//! Observes the signal without altering it and exposes the most recent
//! window as a byte spectrum and a byte waveform, with the same scaling
//! conventions as a browser analyser node:
//! - spectrum: Hann window, FFT, temporal smoothing 0.8, dB mapped from
//!   [-100, -30] onto 0..=255
//! - waveform: 128 + 128·x, clamped
//!
//! Samples cross from the render thread through an SPSC ring; the reader
//! keeps its own sliding window.

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, Mutex};

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

pub struct AnalysisTap {
    fft_size: usize,
    producer: Mutex<HeapProd<f32>>,
    reader: Mutex<Reader>,
}

struct Reader {
    consumer: HeapCons<f32>,
    /// Last `fft_size` mono samples, oldest first
    window: Vec<f32>,
    hann: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Smoothed linear magnitudes, one per bin
    smoothed: Vec<f32>,
    smoothing: f32,
}

impl AnalysisTap {
    /// # Arguments
    /// * `fft_size` - Window length; rounded up to a power of two, minimum 32
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let (producer, consumer) = HeapRb::<f32>::new(fft_size * 4).split();

        let hann = (0..fft_size)
            .map(|i| {
                let x = i as f32 / fft_size as f32;
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
            })
            .collect();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        Self {
            fft_size,
            producer: Mutex::new(producer),
            reader: Mutex::new(Reader {
                consumer,
                window: vec![0.0; fft_size],
                hann,
                fft,
                scratch: vec![Complex::new(0.0, 0.0); fft_size],
                smoothed: vec![0.0; fft_size / 2],
                smoothing: DEFAULT_SMOOTHING,
            }),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of spectrum bins (half the FFT size)
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed interleaved stereo from the render path
    ///
    /// Never blocks on the reader; samples are dropped when the ring is full.
    pub fn write(&self, frames: &[f32]) {
        let Ok(mut producer) = self.producer.try_lock() else {
            return;
        };
        for frame in frames.chunks_exact(2) {
            if producer.try_push((frame[0] + frame[1]) * 0.5).is_err() {
                break;
            }
        }
    }

    /// Fill `out` with the byte spectrum of the latest window
    pub fn get_byte_frequency_data(&self, out: &mut [u8]) {
        let mut reader = self.lock_reader();
        reader.pull();
        reader.analyze();
        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (byte, magnitude) in out.iter_mut().zip(reader.smoothed.iter()) {
            let db = if *magnitude > 0.0 {
                20.0 * magnitude.log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = (db - MIN_DECIBELS) / range * 255.0;
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    /// Fill `out` with the most recent `out.len()` samples as bytes
    pub fn get_byte_time_domain_data(&self, out: &mut [u8]) {
        let mut reader = self.lock_reader();
        reader.pull();
        let n = out.len().min(reader.window.len());
        let start = reader.window.len() - n;
        for (byte, sample) in out.iter_mut().zip(&reader.window[start..]) {
            *byte = (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
    }

    fn lock_reader(&self) -> std::sync::MutexGuard<'_, Reader> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Reader {
    /// Move everything the producer wrote into the sliding window
    fn pull(&mut self) {
        let size = self.window.len();
        let mut fresh = Vec::new();
        while let Some(sample) = self.consumer.try_pop() {
            fresh.push(sample);
        }
        if fresh.is_empty() {
            return;
        }
        if fresh.len() >= size {
            self.window.copy_from_slice(&fresh[fresh.len() - size..]);
        } else {
            self.window.copy_within(fresh.len().., 0);
            self.window[size - fresh.len()..].copy_from_slice(&fresh);
        }
    }

    fn analyze(&mut self) {
        let n = self.window.len();
        for (slot, (sample, w)) in self.scratch.iter_mut().zip(self.window.iter().zip(&self.hann)) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / n as f32;
        let tau = self.smoothing;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&self.scratch) {
            let magnitude = bin.norm() * scale;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
        }
    }
}
