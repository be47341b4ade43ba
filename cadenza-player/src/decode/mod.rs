//! Decoder adapter boundary
//!
//! The playback core treats codecs as an opaque capability behind two
//! small traits: a backend opens tracks, a stream yields fixed-size PCM
//! frame blocks already converted to the output device format. Any
//! concrete codec library is a plug-in satisfying this contract,
//! selected at startup; its types never leak into the core.

pub mod symphonia;

pub use self::symphonia::SymphoniaBackend;

use crate::error::Result;
use cadenza_common::Track;

/// Output device format every stream delivers samples in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    /// Device sample rate in Hz
    pub sample_rate: u32,
    /// Device channel count
    pub channels: u16,
}

impl OutputSpec {
    pub fn samples_per_frame(&self) -> usize {
        self.channels as usize
    }
}

/// One block of interleaved PCM frames at the output format.
#[derive(Debug, Clone, Default)]
pub struct FrameBlock {
    pub samples: Vec<f32>,
}

impl FrameBlock {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frames(&self, channels: u16) -> usize {
        self.samples.len() / channels as usize
    }
}

/// An open decode stream for one track.
///
/// Dropping the stream releases decoder resources; the engine stops the
/// owning worker first, so closing is safe even mid-read.
pub trait DecodeStream: Send {
    /// Read up to `frames` frames.
    ///
    /// Short blocks occur near end of stream; an empty block is the
    /// authoritative end of stream.
    fn read_frames(&mut self, frames: usize) -> Result<FrameBlock>;

    /// Seek to an absolute frame position (in output frames).
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Total length estimate in output frames, if known.
    ///
    /// May be optimistic for variable-bitrate sources; the actual end of
    /// stream is authoritative and may land earlier.
    fn duration_frames(&self) -> Option<u64>;
}

/// Opens tracks for decoding.
pub trait DecoderBackend: Send + Sync {
    fn open(&self, track: &Track) -> Result<Box<dyn DecodeStream>>;
}
