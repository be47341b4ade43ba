//! Audio output using cpal
//!
//! Owns the output device and stream. The device callback renders whole
//! interleaved blocks straight from the playback engine; master volume
//! and mixing already happened inside the engine, so the callback only
//! converts to the device sample format.

use crate::engine::PlaybackEngine;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Audio output manager.
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device, falling back to the default device when the
    /// requested one cannot be found.
    ///
    /// `sample_rate`/`channels` name the engine's output format; a device
    /// configuration matching them is preferred.
    pub fn new(device_name: Option<String>, sample_rate: u32, channels: u16) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name.as_ref() {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
            match devices.find(|d| d.name().ok().as_ref() == Some(name)) {
                Some(dev) => {
                    info!("Found requested audio device: {}", name);
                    dev
                }
                None => {
                    warn!(
                        "Requested device '{}' not found, falling back to default device",
                        name
                    );
                    host.default_output_device().ok_or_else(|| {
                        Error::AudioOutput(format!(
                            "Device '{}' not found and no default device available",
                            name
                        ))
                    })?
                }
            }
        } else {
            host.default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?
        };

        let (config, sample_format) = Self::get_best_config(&device, sample_rate, channels)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
        })
    }

    /// Pick a device configuration matching the engine's output format.
    fn get_best_config(
        device: &Device,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(StreamConfig, SampleFormat)> {
        let configs: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .collect();
        if let Some(found) = Self::pick_config(&configs, sample_rate, channels) {
            return Ok(found);
        }

        // The default config is only usable when it matches the engine's
        // format; anything else would render at the wrong speed or
        // channel layout.
        let default_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        if default_config.sample_rate().0 == sample_rate && default_config.channels() == channels {
            let sample_format = default_config.sample_format();
            return Ok((default_config.config(), sample_format));
        }
        Err(Error::AudioOutput(format!(
            "No supported device configuration for {}Hz {}ch output",
            sample_rate, channels
        )))
    }

    /// Choose from the supported ranges, preferring f32 samples (no
    /// conversion in the callback), then the integer formats the stream
    /// builders handle.
    fn pick_config(
        configs: &[SupportedStreamConfigRange],
        sample_rate: u32,
        channels: u16,
    ) -> Option<(StreamConfig, SampleFormat)> {
        let in_range = |c: &SupportedStreamConfigRange| {
            c.channels() == channels
                && c.min_sample_rate().0 <= sample_rate
                && c.max_sample_rate().0 >= sample_rate
        };
        let chosen = configs
            .iter()
            .find(|c| in_range(c) && c.sample_format() == SampleFormat::F32)
            .or_else(|| {
                configs.iter().find(|c| {
                    in_range(c)
                        && matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::U16)
                })
            })?;
        let sample_format = chosen.sample_format();
        let config = chosen
            .clone()
            .with_sample_rate(cpal::SampleRate(sample_rate))
            .config();
        Some((config, sample_format))
    }

    /// Start the output stream, pulling blocks from `engine`.
    pub fn start(&mut self, engine: Arc<PlaybackEngine>) -> Result<()> {
        info!("Starting audio stream on {}", self.device_name());

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream_f32(engine)?,
            SampleFormat::I16 => self.build_stream_i16(engine)?,
            SampleFormat::U16 => self.build_stream_u16(engine)?,
            sample_format => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);
        info!("Audio stream started");
        Ok(())
    }

    fn build_stream_f32(&self, engine: Arc<PlaybackEngine>) -> Result<Stream> {
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    engine.render(data);
                    for s in data.iter_mut() {
                        *s = s.clamp(-1.0, 1.0);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;
        Ok(stream)
    }

    fn build_stream_i16(&self, engine: Arc<PlaybackEngine>) -> Result<Stream> {
        let mut scratch: Vec<f32> = Vec::new();
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    engine.render(&mut scratch);
                    for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                        *dst = (src.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;
        Ok(stream)
    }

    fn build_stream_u16(&self, engine: Arc<PlaybackEngine>) -> Result<Stream> {
        let mut scratch: Vec<f32> = Vec::new();
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    engine.render(&mut scratch);
                    for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                        // [-1.0, 1.0] -> [0, 65535]
                        *dst = ((src.clamp(-1.0, 1.0) + 1.0) * 32767.5) as u16;
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;
        Ok(stream)
    }

    /// Stop playback and drop the stream.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio stream");
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
            drop(stream);
        }
        Ok(())
    }

    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_devices_does_not_panic() {
        // Hardware-dependent; either outcome is acceptable.
        let result = AudioOutput::list_devices();
        assert!(result.is_ok() || result.is_err());
    }

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(min),
            cpal::SampleRate(max),
            cpal::SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn pick_config_prefers_f32_at_the_engine_rate() {
        let configs = vec![
            range(2, 8000, 96000, SampleFormat::I16),
            range(2, 8000, 96000, SampleFormat::F32),
        ];
        let (config, format) = AudioOutput::pick_config(&configs, 44100, 2).unwrap();
        assert_eq!(format, SampleFormat::F32);
        assert_eq!(config.sample_rate.0, 44100);
        assert_eq!(config.channels, 2);
    }

    #[test]
    fn pick_config_falls_back_to_integer_formats() {
        let configs = vec![range(2, 44100, 48000, SampleFormat::I16)];
        let (config, format) = AudioOutput::pick_config(&configs, 44100, 2).unwrap();
        assert_eq!(format, SampleFormat::I16);
        assert_eq!(config.sample_rate.0, 44100);
    }

    #[test]
    fn pick_config_rejects_mismatched_rate_or_layout() {
        let configs = vec![
            range(2, 8000, 22050, SampleFormat::F32),
            range(1, 8000, 96000, SampleFormat::F32),
        ];
        assert!(AudioOutput::pick_config(&configs, 44100, 2).is_none());
    }
}
