//! Smoothed gain stages
//!
//! Parameter changes are never applied as instantaneous steps: each parameter
//! approaches its target exponentially (one-pole), which removes zipper noise
//! and clicks.

use std::sync::Mutex;

/// Default smoothing time constant (seconds)
pub const DEFAULT_TIME_CONSTANT: f32 = 0.010;

/// Values within this distance of the target snap to it
const SETTLE_EPSILON: f32 = 1e-5;

/// One-pole parameter smoother
#[derive(Debug, Clone)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    /// Per-sample approach factor, 1 - e^(-1 / (tau * fs))
    coeff: f32,
}

impl SmoothedParam {
    pub fn new(value: f32, time_constant: f32, sample_rate: u32) -> Self {
        let samples = (time_constant * sample_rate as f32).max(1.0);
        Self {
            current: value,
            target: value,
            coeff: 1.0 - (-1.0 / samples).exp(),
        }
    }

    pub fn set_target(&mut self, value: f32) {
        self.target = value;
    }

    /// Jump straight to `value` (no ramp)
    pub fn set_immediate(&mut self, value: f32) {
        self.target = value;
        self.current = value;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Advance one sample and return the new value
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.current != self.target {
            self.current += (self.target - self.current) * self.coeff;
            if (self.target - self.current).abs() < SETTLE_EPSILON {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Advance `samples` samples at once and return the new value
    pub fn advance(&mut self, samples: usize) -> f32 {
        if self.current != self.target {
            let remaining = (1.0 - self.coeff).powi(samples as i32);
            self.current = self.target + (self.current - self.target) * remaining;
            if (self.target - self.current).abs() < SETTLE_EPSILON {
                self.current = self.target;
            }
        }
        self.current
    }
}

/// Linear gain applied to interleaved stereo
#[derive(Debug)]
pub struct GainNode {
    param: Mutex<SmoothedParam>,
}

impl GainNode {
    pub fn new(gain: f32, sample_rate: u32) -> Self {
        Self {
            param: Mutex::new(SmoothedParam::new(gain, DEFAULT_TIME_CONSTANT, sample_rate)),
        }
    }

    /// Ramp towards `gain`
    pub fn set_gain(&self, gain: f32) {
        self.lock().set_target(gain.max(0.0));
    }

    /// Jump to `gain` without ramping
    pub fn set_gain_immediate(&self, gain: f32) {
        self.lock().set_immediate(gain.max(0.0));
    }

    /// Target gain (what the ramp is heading for)
    pub fn gain(&self) -> f32 {
        self.lock().target()
    }

    /// Gain the last processed sample was scaled by
    pub fn current_gain(&self) -> f32 {
        self.lock().current()
    }

    pub fn process(&self, frames: &mut [f32]) {
        let mut param = self.lock();
        if param.is_settled() {
            let g = param.current();
            if g != 1.0 {
                frames.iter_mut().for_each(|s| *s *= g);
            }
            return;
        }
        for frame in frames.chunks_exact_mut(2) {
            let g = param.next_value();
            frame[0] *= g;
            frame[1] *= g;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SmoothedParam> {
        self.param.lock().unwrap_or_else(|e| e.into_inner())
    }
}
