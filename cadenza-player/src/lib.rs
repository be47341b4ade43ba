//! Cadenza audio player
//!
//! Playback core for a local music player: a deterministic queue with
//! shuffle/repeat/history, decoder workers feeding per-stream lookahead
//! buffers, and a render path that produces gapless or crossfaded
//! transitions between tracks.
//!
//! `PlaybackEngine` is the public surface; `AudioOutput` connects it to
//! a cpal device. Shared types (tracks, events, fade curves) live in
//! the `cadenza-common` crate.

pub mod buffer;
pub mod config;
pub mod crossfade;
pub mod decode;
pub mod engine;
pub mod error;
pub mod output;
pub mod queue;

pub use config::PlayerConfig;
pub use engine::{EngineStatus, PlaybackEngine};
pub use error::{Error, Result};
pub use output::AudioOutput;
