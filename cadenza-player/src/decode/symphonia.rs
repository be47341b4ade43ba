//! Symphonia-backed decoder
//!
//! Decodes compressed audio (MP3, FLAC, AAC, Vorbis, WAV, ...) to
//! interleaved f32 PCM, converts the channel layout, and resamples with
//! rubato when the source rate differs from the output device rate.
//!
//! Seeking uses the container's coarse seek plus decode-and-skip to the
//! exact frame, which stays sample-accurate on variable-bitrate sources.

use super::{DecodeStream, DecoderBackend, FrameBlock, OutputSpec};
use crate::error::{Error, Result};
use cadenza_common::Track;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::fs::File;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};
use uuid::Uuid;

/// Frames fed to the resampler per chunk.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Codec backend built on symphonia + rubato.
pub struct SymphoniaBackend {
    spec: OutputSpec,
}

impl SymphoniaBackend {
    pub fn new(spec: OutputSpec) -> Self {
        Self { spec }
    }
}

impl DecoderBackend for SymphoniaBackend {
    fn open(&self, track: &Track) -> Result<Box<dyn DecodeStream>> {
        let stream = SymphoniaStream::open(track, self.spec)?;
        Ok(Box::new(stream))
    }
}

/// One open symphonia decode stream.
struct SymphoniaStream {
    track_id: Uuid,
    spec: OutputSpec,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    /// Container-internal track id
    sym_track_id: u32,
    src_rate: u32,
    src_channels: usize,
    /// Total length in output frames, from container metadata
    duration_out: Option<u64>,
    /// Decoded, converted samples not yet handed out (output format)
    pending: Vec<f32>,
    /// Planar accumulation at the source rate, output channel count
    resample_input: Vec<Vec<f32>>,
    resampler: Option<FastFixedIn<f32>>,
    /// Source frames to discard after a coarse container seek
    skip_src_frames: u64,
    eof: bool,
}

impl SymphoniaStream {
    fn open(track: &Track, spec: OutputSpec) -> Result<Self> {
        let file = File::open(&track.path).map_err(|e| {
            Error::decode(
                track.id,
                format!("Failed to open {}: {}", track.path.display(), e),
            )
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Hint the probe with the file extension
        let mut hint = Hint::new();
        if let Some(ext) = track.path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::decode(track.id, format!("Failed to probe format: {}", e)))?;
        let format = probed.format;

        let sym_track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::decode(track.id, "No audio track found"))?;
        let sym_track_id = sym_track.id;
        let codec_params = sym_track.codec_params.clone();

        let src_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::decode(track.id, "Sample rate not found"))?;
        let src_channels = codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| Error::decode(track.id, "Channel count not found"))?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::decode(track.id, format!("Failed to create decoder: {}", e)))?;

        // Container frame count is an estimate for VBR sources; the
        // actual end of stream is authoritative.
        let duration_out = codec_params
            .n_frames
            .map(|n| n * spec.sample_rate as u64 / src_rate as u64);

        let resampler = if src_rate != spec.sample_rate {
            let r = FastFixedIn::<f32>::new(
                spec.sample_rate as f64 / src_rate as f64,
                1.0, // ratio fixed at open
                PolynomialDegree::Septic,
                RESAMPLE_CHUNK_FRAMES,
                spec.channels as usize,
            )
            .map_err(|e| Error::decode(track.id, format!("Failed to create resampler: {}", e)))?;
            Some(r)
        } else {
            None
        };

        debug!(
            "Opened {}: {}Hz {}ch -> {}Hz {}ch, duration {:?} frames",
            track.path.display(),
            src_rate,
            src_channels,
            spec.sample_rate,
            spec.channels,
            duration_out
        );

        Ok(Self {
            track_id: track.id,
            spec,
            format,
            decoder,
            sym_track_id,
            src_rate,
            src_channels,
            duration_out,
            pending: Vec::new(),
            resample_input: vec![Vec::new(); spec.channels as usize],
            resampler,
            skip_src_frames: 0,
            eof: false,
        })
    }

    /// Convert an interleaved source-format packet into pending output
    /// samples.
    fn push_decoded(&mut self, samples: &[f32]) -> Result<()> {
        let mut samples = samples;

        // Decode-and-skip after a coarse seek
        if self.skip_src_frames > 0 {
            let frames = samples.len() / self.src_channels;
            let skip = (self.skip_src_frames as usize).min(frames);
            samples = &samples[skip * self.src_channels..];
            self.skip_src_frames -= skip as u64;
            if samples.is_empty() {
                return Ok(());
            }
        }

        let mapped = map_channels(samples, self.src_channels, self.spec.channels as usize);

        match &mut self.resampler {
            None => self.pending.extend_from_slice(&mapped),
            Some(_) => {
                deinterleave_into(&mapped, &mut self.resample_input);
                self.drain_resampler(false)?;
            }
        }
        Ok(())
    }

    /// Run buffered source frames through the resampler. With `flush`,
    /// also process the final partial chunk at end of stream.
    fn drain_resampler(&mut self, flush: bool) -> Result<()> {
        let Some(resampler) = &mut self.resampler else {
            return Ok(());
        };
        loop {
            let buffered = self.resample_input[0].len();
            if buffered >= RESAMPLE_CHUNK_FRAMES {
                let chunk: Vec<Vec<f32>> = self
                    .resample_input
                    .iter_mut()
                    .map(|ch| ch.drain(..RESAMPLE_CHUNK_FRAMES).collect())
                    .collect();
                let out = resampler
                    .process(&chunk, None)
                    .map_err(|e| Error::decode(self.track_id, format!("Resampling failed: {}", e)))?;
                interleave_into(&out, &mut self.pending);
            } else if flush && buffered > 0 {
                let chunk: Vec<Vec<f32>> = self
                    .resample_input
                    .iter_mut()
                    .map(|ch| ch.drain(..).collect())
                    .collect();
                let out = resampler
                    .process_partial(Some(&chunk), None)
                    .map_err(|e| Error::decode(self.track_id, format!("Resampling failed: {}", e)))?;
                interleave_into(&out, &mut self.pending);
                return Ok(());
            } else {
                return Ok(());
            }
        }
    }
}

impl DecodeStream for SymphoniaStream {
    fn read_frames(&mut self, frames: usize) -> Result<FrameBlock> {
        let want = frames * self.spec.channels as usize;

        while self.pending.len() < want && !self.eof {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("end of stream: {}", self.track_id);
                    self.eof = true;
                    self.drain_resampler(true)?;
                    break;
                }
                Err(e) => {
                    return Err(Error::decode(
                        self.track_id,
                        format!("Error reading packet: {}", e),
                    ))
                }
            };

            if packet.track_id() != self.sym_track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    // Copy out of the decoder-owned buffer; the borrow on
                    // the decoder must end before the samples are pushed.
                    let signal_spec = *decoded.spec();
                    let mut sample_buf =
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, signal_spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    self.push_decoded(sample_buf.samples())?;
                }
                // A corrupt packet is recoverable; resynchronize on the next
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    warn!("decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(Error::decode(self.track_id, format!("Decode failed: {}", e)))
                }
            }
        }

        let take = want.min(self.pending.len());
        let samples: Vec<f32> = self.pending.drain(..take).collect();
        Ok(FrameBlock { samples })
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let src_frame = frame * self.src_rate as u64 / self.spec.sample_rate as u64;
        let seconds = src_frame / self.src_rate as u64;
        let frac = (src_frame % self.src_rate as u64) as f64 / self.src_rate as f64;

        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(seconds, frac),
                    track_id: Some(self.sym_track_id),
                },
            )
            .map_err(|e| Error::decode(self.track_id, format!("Seek failed: {}", e)))?;
        self.decoder.reset();

        self.pending.clear();
        for ch in &mut self.resample_input {
            ch.clear();
        }
        self.eof = false;
        // The demuxer lands at or before the requested timestamp;
        // decode-and-skip covers the difference.
        self.skip_src_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        debug!(
            "seek to frame {} (skip {} source frames)",
            frame, self.skip_src_frames
        );
        Ok(())
    }

    fn duration_frames(&self) -> Option<u64> {
        self.duration_out
    }
}

/// Map an interleaved block between channel layouts: mono is duplicated,
/// downmix to mono averages, anything else truncates or zero-fills.
fn map_channels(input: &[f32], src_ch: usize, out_ch: usize) -> Vec<f32> {
    if src_ch == out_ch {
        return input.to_vec();
    }
    let frames = input.len() / src_ch;
    let mut out = Vec::with_capacity(frames * out_ch);
    for f in 0..frames {
        let frame = &input[f * src_ch..(f + 1) * src_ch];
        match (src_ch, out_ch) {
            (1, _) => out.extend(std::iter::repeat(frame[0]).take(out_ch)),
            (_, 1) => out.push(frame.iter().sum::<f32>() / src_ch as f32),
            _ => {
                for c in 0..out_ch {
                    out.push(frame.get(c).copied().unwrap_or(0.0));
                }
            }
        }
    }
    out
}

/// Append interleaved samples to planar channel buffers.
fn deinterleave_into(input: &[f32], planar: &mut [Vec<f32>]) {
    let channels = planar.len();
    for frame in input.chunks_exact(channels) {
        for (c, &s) in frame.iter().enumerate() {
            planar[c].push(s);
        }
    }
}

/// Append planar channel buffers as interleaved samples.
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    if planar.is_empty() {
        return;
    }
    let frames = planar[0].len();
    for f in 0..frames {
        for ch in planar {
            out.push(ch[f]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_duplicates_to_stereo() {
        let out = map_channels(&[0.1, 0.2], 1, 2);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_averages_to_mono() {
        let out = map_channels(&[1.0, 0.0, 0.5, 0.5], 2, 1);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn surround_truncates_to_stereo() {
        let out = map_channels(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 6, 2);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn interleave_roundtrip() {
        let mut planar = vec![Vec::new(); 2];
        deinterleave_into(&[1.0, 2.0, 3.0, 4.0], &mut planar);
        assert_eq!(planar, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
        let mut out = Vec::new();
        interleave_into(&planar, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
