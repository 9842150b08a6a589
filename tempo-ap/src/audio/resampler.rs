//! Sample-rate conversion using rubato
//!
//! Decoded audio is converted once, at load time, to the processing
//! context's rate so the render path never has to resample.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

pub struct Resampler;

impl Resampler {
    /// Resample interleaved audio to `output_rate`
    ///
    /// # Arguments
    /// - `input`: Interleaved samples
    /// - `input_rate`: Rate of `input`
    /// - `output_rate`: Desired rate
    /// - `channels`: Channel count of `input`
    ///
    /// # Returns
    /// Interleaved samples at `output_rate` (a plain copy when the rates match)
    pub fn resample(input: &[f32], input_rate: u32, output_rate: u32, channels: usize) -> Result<Vec<f32>> {
        if input_rate == output_rate || input.is_empty() {
            return Ok(input.to_vec());
        }
        if channels == 0 {
            return Err(Error::Decode("cannot resample zero channels".to_string()));
        }

        let planar_input = Self::deinterleave(input, channels);
        let input_frames = planar_input[0].len();

        let mut resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            input_frames,
            channels,
        )
        .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;

        let planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        let output = Self::interleave(&planar_output);
        debug!(
            input_rate,
            output_rate,
            input_frames,
            output_frames = output.len() / channels,
            "Resampled"
        );
        Ok(output)
    }

    /// [L, R, L, R, ...] → [[L, L, ...], [R, R, ...]]
    fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (ch, sample) in frame.iter().enumerate() {
                planar[ch].push(*sample);
            }
        }
        planar
    }

    fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
        let channels = planar.len();
        let frames = planar.iter().map(Vec::len).min().unwrap_or(0);
        let mut out = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            for channel in planar {
                out.push(channel[i]);
            }
        }
        out
    }
}
