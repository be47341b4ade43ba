//! Configuration for the Cadenza playback core
//!
//! A single TOML file (all sections optional) configures the crossfade
//! window, the fade curve, queue history depth, lookahead buffering, the
//! underrun policy, and the output device format. Built-in defaults are
//! defined in code so the player runs with no config file at all.

use crate::error::{Error, Result};
use cadenza_common::{FadeCurve, UnderrunPolicy};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Top-level player configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlayerConfig {
    pub playback: PlaybackConfig,
    pub queue: QueueConfig,
    pub buffer: BufferConfig,
    pub audio: AudioConfig,
}

/// Crossfade and volume settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Crossfade window length in seconds. 0 disables crossfading
    /// (track changes become gapless hard cuts).
    pub crossfade_seconds: f64,

    /// Gain curve applied to both envelope sides of a crossfade
    pub fade_curve: FadeCurve,

    /// Initial master volume (0.0..=1.0)
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            crossfade_seconds: 5.0,
            fade_curve: FadeCurve::default(),
            volume: 1.0,
        }
    }
}

/// Queue behavior settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum history entries kept for "previous"
    pub history_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { history_depth: 64 }
    }
}

/// Lookahead buffer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Lookahead buffer length per active stream, in seconds
    pub lookahead_seconds: f64,

    /// What the render path emits when a decoder worker falls behind
    pub underrun: UnderrunPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            lookahead_seconds: 5.0,
            underrun: UnderrunPolicy::default(),
        }
    }
}

/// Output device format settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default)
    pub device: Option<String>,

    /// Output sample rate in Hz; decoders resample to this
    pub sample_rate: u32,

    /// Output channel count
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 44100,
            channels: 2,
        }
    }
}

impl PlayerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: PlayerConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from a file if given, otherwise use built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.playback.crossfade_seconds < 0.0 {
            return Err(Error::Config(
                "playback.crossfade_seconds must be >= 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.playback.volume) {
            return Err(Error::Config("playback.volume must be in 0.0..=1.0".into()));
        }
        if self.buffer.lookahead_seconds <= 0.0 {
            return Err(Error::Config(
                "buffer.lookahead_seconds must be > 0".into(),
            ));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(Error::Config(
                "audio.sample_rate and audio.channels must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Crossfade window in output frames.
    pub fn crossfade_frames(&self) -> u64 {
        (self.playback.crossfade_seconds * self.audio.sample_rate as f64).round() as u64
    }

    /// Lookahead buffer length in output frames.
    pub fn lookahead_frames(&self) -> usize {
        (self.buffer.lookahead_seconds * self.audio.sample_rate as f64).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlayerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.crossfade_frames(), 5 * 44100);
        assert_eq!(config.audio.channels, 2);
    }

    #[test]
    fn parses_partial_toml() {
        let config: PlayerConfig = toml::from_str(
            r#"
            [playback]
            crossfade_seconds = 2.5
            fade_curve = "linear"

            [buffer]
            underrun = "repeat-last"
            "#,
        )
        .unwrap();
        assert_eq!(config.playback.crossfade_seconds, 2.5);
        assert_eq!(config.playback.fade_curve, FadeCurve::Linear);
        assert_eq!(
            config.buffer.underrun,
            UnderrunPolicy::RepeatLast
        );
        // untouched sections keep defaults
        assert_eq!(config.queue.history_depth, 64);
        assert_eq!(config.audio.sample_rate, 44100);
    }

    #[test]
    fn rejects_negative_crossfade() {
        let config: PlayerConfig = toml::from_str(
            r#"
            [playback]
            crossfade_seconds = -1.0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
