//! Playback state enums
//!
//! Small closed enums dispatched by explicit matching; serialized forms
//! are consumed by the UI collaborator and by the TOML config.

use serde::{Deserialize, Serialize};

/// Top-level transport state.
///
/// `Playing` carries an internal sub-state (crossfade in flight) that is
/// reported separately via `PlayerEvent::TransitionStarted`; it is not a
/// distinct top-level state because pause/skip behave the same either way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// What "next" means at the end of a track or of the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop at the end of the queue
    #[default]
    Off,
    /// Wrap to the start of the queue (reshuffling if shuffle is on)
    All,
    /// Replay the current track indefinitely
    One,
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Off => write!(f, "off"),
            RepeatMode::All => write!(f, "all"),
            RepeatMode::One => write!(f, "one"),
        }
    }
}

/// What the render path emits when a decoder worker falls behind.
///
/// Either way the underrun is counted and surfaced as an event; it never
/// stalls the output clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UnderrunPolicy {
    /// Insert silence for the missing frames
    #[default]
    Silence,
    /// Repeat the last delivered frame
    RepeatLast,
}
