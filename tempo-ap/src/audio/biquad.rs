//! Peaking biquad filter for equalizer bands
//!
//! RBJ cookbook peaking EQ in transposed direct form II, one state per
//! stereo channel. The gain (dB) is a smoothed parameter; coefficients are
//! recomputed per block while the ramp is moving.

use super::gain::{SmoothedParam, DEFAULT_TIME_CONSTANT};
use std::f64::consts::PI;

/// One-octave bandwidth
pub const OCTAVE_Q: f32 = 1.41;

/// Frames per coefficient update while a gain ramp is in progress
const BLOCK_FRAMES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Coeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coeffs {
    fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    fn peaking(frequency: f32, q: f32, gain_db: f32, sample_rate: u32) -> Self {
        if gain_db == 0.0 {
            return Self::identity();
        }
        let fs = sample_rate as f64;
        let freq = (frequency as f64).clamp(1.0, fs * 0.45);
        let q = (q as f64).max(0.01);

        let a = 10f64.powf(gain_db as f64 / 40.0);
        let w0 = 2.0 * PI * freq / fs;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        if !a0.is_finite() || a0.abs() < 1e-12 {
            return Self::identity();
        }
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    z1: f64,
    z2: f64,
}

impl ChannelState {
    #[inline]
    fn tick(&mut self, c: &Coeffs, x: f64) -> f64 {
        let y = c.b0 * x + self.z1;
        self.z1 = c.b1 * x - c.a1 * y + self.z2;
        self.z2 = c.b2 * x - c.a2 * y;
        y
    }
}

/// Peaking (bell) filter over interleaved stereo
#[derive(Debug, Clone)]
pub struct PeakingFilter {
    frequency: f32,
    q: f32,
    sample_rate: u32,
    gain_db: SmoothedParam,
    applied_db: f32,
    coeffs: Coeffs,
    state: [ChannelState; 2],
}

impl PeakingFilter {
    pub fn new(frequency: f32, q: f32, gain_db: f32, sample_rate: u32) -> Self {
        Self {
            frequency,
            q,
            sample_rate,
            gain_db: SmoothedParam::new(gain_db, DEFAULT_TIME_CONSTANT, sample_rate),
            applied_db: gain_db,
            coeffs: Coeffs::peaking(frequency, q, gain_db, sample_rate),
            state: [ChannelState::default(); 2],
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Ramp the band gain towards `db`
    pub fn set_gain_db(&mut self, db: f32) {
        self.gain_db.set_target(db);
    }

    /// Target gain in dB
    pub fn gain_db(&self) -> f32 {
        self.gain_db.target()
    }

    /// Gain the coefficients currently reflect
    pub fn current_gain_db(&self) -> f32 {
        self.applied_db
    }

    pub fn process(&mut self, frames: &mut [f32]) {
        for block in frames.chunks_mut(BLOCK_FRAMES * 2) {
            if !self.gain_db.is_settled() || self.applied_db != self.gain_db.current() {
                let db = self.gain_db.advance(block.len() / 2);
                if db != self.applied_db {
                    self.coeffs = Coeffs::peaking(self.frequency, self.q, db, self.sample_rate);
                    self.applied_db = db;
                }
            }
            if self.coeffs == Coeffs::identity() && self.is_quiet() {
                continue;
            }
            for frame in block.chunks_exact_mut(2) {
                frame[0] = self.state[0].tick(&self.coeffs, frame[0] as f64) as f32;
                frame[1] = self.state[1].tick(&self.coeffs, frame[1] as f64) as f32;
            }
        }
    }

    /// Magnitude response in dB at `frequency` for the current coefficients
    pub fn response_db(&self, frequency: f32) -> f32 {
        let c = &self.coeffs;
        let w = 2.0 * PI * frequency as f64 / self.sample_rate as f64;
        let (s1, c1) = w.sin_cos();
        let (s2, c2) = (2.0 * w).sin_cos();
        // H(e^jw) = (b0 + b1 e^-jw + b2 e^-2jw) / (1 + a1 e^-jw + a2 e^-2jw)
        let num_re = c.b0 + c.b1 * c1 + c.b2 * c2;
        let num_im = -(c.b1 * s1 + c.b2 * s2);
        let den_re = 1.0 + c.a1 * c1 + c.a2 * c2;
        let den_im = -(c.a1 * s1 + c.a2 * s2);
        let mag = ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt();
        (20.0 * mag.log10()) as f32
    }

    fn is_quiet(&self) -> bool {
        self.state.iter().all(|s| s.z1 == 0.0 && s.z2 == 0.0)
    }
}
