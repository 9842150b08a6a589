//! In-memory decoding using symphonia
//!
//! Resolved bytes are decoded in full, folded to stereo and resampled to the
//! processing rate. The result is immutable and shared with the render path.

use super::resampler::Resampler;
use crate::error::{Error, Result};
use std::io::Cursor;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Output channel count of every decoded buffer
pub const CHANNELS: usize = 2;

/// Fully decoded, render-ready audio
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved stereo samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Stereo frame at `index`, silence past the end
    #[inline]
    pub fn frame(&self, index: usize) -> (f32, f32) {
        let i = index * CHANNELS;
        match self.samples.get(i..i + CHANNELS) {
            Some(f) => (f[0], f[1]),
            None => (0.0, 0.0),
        }
    }
}

/// Decode a complete byte buffer
///
/// # Arguments
/// - `bytes`: Encoded audio (any container symphonia was built with)
/// - `hint`: File extension used to speed up probing
/// - `target_rate`: Processing rate the result is resampled to
///
/// # Errors
/// `Error::Decode` when the container cannot be probed, has no audio track,
/// or yields no samples at all.
pub fn decode_bytes(bytes: Arc<[u8]>, hint: Option<&str>, target_rate: u32) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut probe_hint = Hint::new();
    if let Some(ext) = hint {
        probe_hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&probe_hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;
    let track_id = track.id;
    let source_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut stereo = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                warn!("Error reading packet: {}", e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(Error::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let too_small = sample_buf
            .as_ref()
            .map_or(true, |b| b.capacity() < decoded.capacity() * channels);
        if too_small {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            fold_to_stereo(buf.samples(), channels, &mut stereo);
        }
    }

    if stereo.is_empty() {
        return Err(Error::Decode("Stream contained no audio".to_string()));
    }

    let samples = Resampler::resample(&stereo, source_rate, target_rate, CHANNELS)?;
    let audio = DecodedAudio {
        samples,
        sample_rate: target_rate,
    };
    debug!(
        source_rate,
        target_rate,
        frames = audio.frames(),
        duration_secs = audio.duration_secs(),
        "Decoded"
    );
    Ok(audio)
}

/// Append interleaved `channels`-wide samples as stereo
///
/// Mono is duplicated; anything wider keeps the first two channels.
fn fold_to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            out.reserve(samples.len() * 2);
            for s in samples {
                out.push(*s);
                out.push(*s);
            }
        }
        2 => out.extend_from_slice(samples),
        n => {
            for frame in samples.chunks_exact(n) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(rate: u32, channels: u16, seconds: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let frames = (rate as f32 * seconds) as usize;
            for i in 0..frames {
                let s = ((i as f32 * 440.0 * 2.0 * std::f32::consts::PI / rate as f32).sin() * 8000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_mono_wav_to_stereo() {
        let bytes: Arc<[u8]> = wav_bytes(8000, 1, 0.5).into();
        let audio = decode_bytes(bytes, Some("wav"), 8000).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.frames(), 4000);
        let (l, r) = audio.frame(100);
        assert_eq!(l, r);
        assert!((audio.duration_secs() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn resamples_to_target_rate() {
        let bytes: Arc<[u8]> = wav_bytes(8000, 2, 0.5).into();
        let audio = decode_bytes(bytes, Some("wav"), 16000).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert!((audio.duration_secs() - 0.5).abs() < 0.05);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let bytes: Arc<[u8]> = vec![0x42u8; 512].into();
        assert!(matches!(decode_bytes(bytes, None, 8000), Err(Error::Decode(_))));
    }

    #[test]
    fn frame_past_end_is_silence() {
        let audio = DecodedAudio {
            samples: vec![0.5, -0.5],
            sample_rate: 8000,
        };
        assert_eq!(audio.frame(0), (0.5, -0.5));
        assert_eq!(audio.frame(1), (0.0, 0.0));
    }

    #[test]
    fn wide_streams_keep_front_pair() {
        let mut out = Vec::new();
        fold_to_stereo(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 4.0, 5.0]);
    }
}
