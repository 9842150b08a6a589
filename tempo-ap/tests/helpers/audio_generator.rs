//! Test WAV generation
//!
//! Small mono 16-bit files at the engine test rate, so decode is fast and
//! no resampling happens.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::TAU;
use std::path::Path;

/// Rate of generated files and of the test processing context
pub const TEST_SAMPLE_RATE: u32 = 8000;

/// Write `secs` of a sine tone at `freq` Hz
pub fn write_tone<P: AsRef<Path>>(path: P, secs: f32, freq: f32) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let frames = (secs * TEST_SAMPLE_RATE as f32) as usize;
    for i in 0..frames {
        let t = i as f32 / TEST_SAMPLE_RATE as f32;
        let sample = (t * freq * TAU).sin() * 0.3;
        writer.write_sample((sample * i16::MAX as f32) as i16)?;
    }
    writer.finalize()
}

/// Tone bytes for tracks that live only in memory
pub fn tone_bytes(secs: f32, freq: f32) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).expect("wav header");
        let frames = (secs * TEST_SAMPLE_RATE as f32) as usize;
        for i in 0..frames {
            let t = i as f32 / TEST_SAMPLE_RATE as f32;
            let sample = (t * freq * TAU).sin() * 0.3;
            writer
                .write_sample((sample * i16::MAX as f32) as i16)
                .expect("wav sample");
        }
        writer.finalize().expect("wav finalize");
    }
    cursor.into_inner()
}
