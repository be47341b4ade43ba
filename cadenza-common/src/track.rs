//! Track records
//!
//! A `Track` is produced by external collaborators (library scanner,
//! download pipeline) and consumed by the queue. It is immutable once
//! enqueued; queue positions share it by `Arc`, so duplicate entries and
//! repeat-one both reference the same record.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// An enqueueable audio source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Stable identity, assigned at ingestion
    pub id: Uuid,

    /// Audio file path
    pub path: PathBuf,

    /// Total length in output frames, if known up front.
    ///
    /// For variable-bitrate sources this is an estimate; the decoder's
    /// actual end of stream is authoritative and may land earlier.
    pub duration_frames: Option<u64>,

    /// Source sample rate in Hz
    pub sample_rate: u32,

    /// Source channel count (1 = mono, 2 = stereo)
    pub channels: u16,
}

impl Track {
    /// Create a track with a fresh id.
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32, channels: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            duration_frames: None,
            sample_rate,
            channels,
        }
    }

    /// Attach a duration hint in frames.
    pub fn with_duration(mut self, frames: u64) -> Self {
        self.duration_frames = Some(frames);
        self
    }
}
