//! Output drivers
//!
//! Drivers pull blocks from the [`Mixer`]. The headless driver keeps the
//! render clock running in real time without hardware; the cpal driver
//! (feature `device`) feeds a sound card.

use super::mixer::{Mixer, RENDER_BLOCK_FRAMES};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Renders the mixer on a tokio interval and throws the audio away
pub struct HeadlessOutput {
    task: Option<JoinHandle<()>>,
}

impl HeadlessOutput {
    /// Start rendering `mixer` in real time
    pub fn start(mixer: Arc<Mixer>) -> Self {
        let rate = mixer.sample_rate().max(1);
        let period = Duration::from_secs_f64(RENDER_BLOCK_FRAMES as f64 / rate as f64);
        info!(sample_rate = rate, period_ms = period.as_millis() as u64, "Starting headless output");

        let task = tokio::spawn(async move {
            let mut block = vec![0.0f32; RENDER_BLOCK_FRAMES * 2];
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                mixer.render(&mut block);
            }
        });
        Self { task: Some(task) }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Headless output stopped");
        }
    }
}

impl Drop for HeadlessOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "device")]
pub use device::DeviceOutput;

#[cfg(feature = "device")]
mod device {
    use super::Mixer;
    use crate::error::{Error, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, SampleFormat, Stream, StreamConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing::{error, info, warn};

    /// Sound card output through cpal
    pub struct DeviceOutput {
        device: Device,
        config: StreamConfig,
        sample_format: SampleFormat,
        stream: Option<Stream>,
        error_flag: Arc<AtomicBool>,
    }

    impl DeviceOutput {
        /// Open `device_name`, falling back to the default device
        pub fn open(device_name: Option<&str>) -> Result<Self> {
            let host = cpal::default_host();
            let requested = match device_name {
                Some(name) => host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
                    .find(|d| d.name().ok().as_deref() == Some(name)),
                None => None,
            };
            let device = match requested {
                Some(device) => device,
                None => {
                    if let Some(name) = device_name {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                    }
                    host.default_output_device()
                        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?
                }
            };

            let supported = device
                .default_output_config()
                .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
            let sample_format = supported.sample_format();
            let config = supported.config();
            info!(
                device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
                sample_rate = config.sample_rate.0,
                channels = config.channels,
                ?sample_format,
                "Opened audio device"
            );

            Ok(Self {
                device,
                config,
                sample_format,
                stream: None,
                error_flag: Arc::new(AtomicBool::new(false)),
            })
        }

        /// Device rate; the processing context must be built with it
        pub fn sample_rate(&self) -> u32 {
            self.config.sample_rate.0
        }

        /// Start pulling blocks from `mixer`
        pub fn start(&mut self, mixer: Arc<Mixer>) -> Result<()> {
            if self.sample_format != SampleFormat::F32 {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    self.sample_format
                )));
            }
            let channels = self.config.channels as usize;
            let error_flag = Arc::clone(&self.error_flag);
            let mut stereo = Vec::new();

            let stream = self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let frames = data.len() / channels.max(1);
                        stereo.resize(frames * 2, 0.0);
                        mixer.render(&mut stereo);
                        for (frame, pair) in data.chunks_mut(channels).zip(stereo.chunks_exact(2)) {
                            frame[0] = pair[0];
                            if channels > 1 {
                                frame[1] = pair[1];
                            }
                            for extra in frame.iter_mut().skip(2) {
                                *extra = 0.0;
                            }
                        }
                    },
                    move |err| {
                        error!("Audio stream error: {}", err);
                        error_flag.store(true, Ordering::SeqCst);
                    },
                    None,
                )
                .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

            stream
                .play()
                .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
            self.stream = Some(stream);
            Ok(())
        }

        pub fn has_error(&self) -> bool {
            self.error_flag.load(Ordering::SeqCst)
        }

        pub fn stop(&mut self) {
            if let Some(stream) = self.stream.take() {
                let _ = stream.pause();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::graph::ProcessingContext;

    #[tokio::test]
    async fn headless_output_runs_until_stopped() {
        let mixer = Arc::new(Mixer::new(Arc::new(ProcessingContext::new(8000))));
        let mut output = HeadlessOutput::start(mixer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(output.is_running());
        output.stop();
        assert!(!output.is_running());
    }
}
