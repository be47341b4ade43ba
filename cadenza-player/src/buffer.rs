//! Lookahead stream buffers
//!
//! Each open decoder stream feeds a lock-free SPSC ring buffer: the
//! decoder worker thread pushes interleaved samples on one side, the
//! audio render path pops on the other. The render path never blocks on
//! decode I/O; when the worker falls behind, the consumer pads the block
//! per the configured underrun policy and counts the padded frames.
//!
//! Worker lifecycle flags (stop/eof/failed) and the revised duration
//! live in `StreamShared`, visible to both sides and to the engine.

use cadenza_common::UnderrunPolicy;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// State shared between a decoder worker, its buffer consumer, and the
/// engine control path.
#[derive(Debug, Default)]
pub struct StreamShared {
    /// Engine asks the worker to stop; checked every worker iteration
    stop: AtomicBool,

    /// Worker reached the authoritative end of stream
    eof: AtomicBool,

    /// Worker hit a decode error (reported separately with the track id)
    failed: AtomicBool,

    /// Total frames the worker has pushed since open/seek
    frames_written: AtomicU64,

    /// Total frames the consumer padded due to underruns
    underrun_frames: AtomicU64,
}

impl StreamShared {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn mark_eof(&self) {
        self.eof.store(true, Ordering::Release);
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn add_frames_written(&self, frames: u64) {
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn add_underrun_frames(&self, frames: u64) {
        self.underrun_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }
}

/// Result of one consumer read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Frames actually delivered from the buffer
    pub delivered: usize,

    /// Frames padded per the underrun policy (zero at end of stream)
    pub padded: usize,

    /// The stream is finished: worker flagged eof (or failed) and the
    /// buffer is drained
    pub end_of_stream: bool,
}

/// Producer half, owned by the decoder worker.
pub struct BufferProducer {
    prod: HeapProd<f32>,
    shared: Arc<StreamShared>,
    channels: usize,
}

impl BufferProducer {
    /// Frames of free space left in the buffer.
    pub fn free_frames(&self) -> usize {
        self.prod.vacant_len() / self.channels
    }

    /// Push interleaved samples; returns frames accepted.
    ///
    /// The worker sizes its blocks against `free_frames`, so a short
    /// push indicates a bookkeeping bug, not a normal condition.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let pushed = self.prod.push_slice(samples);
        let frames = pushed / self.channels;
        self.shared.add_frames_written(frames as u64);
        frames
    }

    pub fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }
}

/// Consumer half, owned by the render path.
pub struct BufferConsumer {
    cons: HeapCons<f32>,
    shared: Arc<StreamShared>,
    channels: usize,
    /// Last delivered frame, for the repeat-last underrun policy
    last_frame: Vec<f32>,
}

impl BufferConsumer {
    /// Frames currently buffered.
    pub fn buffered_frames(&self) -> usize {
        self.cons.occupied_len() / self.channels
    }

    pub fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    /// Fill `dst` (interleaved, whole frames) from the buffer.
    ///
    /// Short reads are padded: with silence or the last frame while the
    /// worker is merely behind (counted as underrun), with silence once
    /// the worker flagged end of stream or failure (not counted).
    pub fn read_frames(&mut self, dst: &mut [f32], policy: UnderrunPolicy) -> ReadOutcome {
        debug_assert_eq!(dst.len() % self.channels, 0);
        let requested = dst.len() / self.channels;

        // Only pop whole frames; a partially written frame stays queued.
        let avail = self.cons.occupied_len() / self.channels;
        let take = avail.min(requested);
        let popped = self.cons.pop_slice(&mut dst[..take * self.channels]);
        debug_assert_eq!(popped, take * self.channels);

        if take > 0 {
            let start = (take - 1) * self.channels;
            self.last_frame.copy_from_slice(&dst[start..take * self.channels]);
        }

        let missing = requested - take;
        if missing == 0 {
            return ReadOutcome {
                delivered: take,
                padded: 0,
                end_of_stream: false,
            };
        }

        let finished = self.shared.is_eof() || self.shared.is_failed();
        let tail = &mut dst[take * self.channels..];
        if finished {
            tail.fill(0.0);
            return ReadOutcome {
                delivered: take,
                padded: 0,
                end_of_stream: true,
            };
        }

        // Worker is behind the output clock.
        match policy {
            UnderrunPolicy::Silence => tail.fill(0.0),
            UnderrunPolicy::RepeatLast => {
                for frame in tail.chunks_exact_mut(self.channels) {
                    frame.copy_from_slice(&self.last_frame);
                }
            }
        }
        self.shared.add_underrun_frames(missing as u64);
        trace!("underrun: padded {} frames", missing);
        ReadOutcome {
            delivered: take,
            padded: missing,
            end_of_stream: false,
        }
    }
}

/// Create an SPSC stream buffer holding `capacity_frames` frames.
pub fn stream_buffer(
    capacity_frames: usize,
    channels: usize,
) -> (BufferProducer, BufferConsumer) {
    let rb = HeapRb::<f32>::new(capacity_frames.max(1) * channels);
    let (prod, cons) = rb.split();
    let shared = Arc::new(StreamShared::default());
    (
        BufferProducer {
            prod,
            shared: Arc::clone(&shared),
            channels,
        },
        BufferConsumer {
            cons,
            shared,
            channels,
            last_frame: vec![0.0; channels],
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_roundtrips_frames() {
        let (mut prod, mut cons) = stream_buffer(16, 2);
        let frames = prod.push_samples(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames, 2);
        assert_eq!(cons.buffered_frames(), 2);

        let mut dst = [0.0f32; 4];
        let outcome = cons.read_frames(&mut dst, UnderrunPolicy::Silence);
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.padded, 0);
        assert!(!outcome.end_of_stream);
        assert_eq!(dst, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn short_read_pads_silence_and_counts_underrun() {
        let (mut prod, mut cons) = stream_buffer(16, 2);
        prod.push_samples(&[0.5, 0.5]);

        let mut dst = [1.0f32; 6];
        let outcome = cons.read_frames(&mut dst, UnderrunPolicy::Silence);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.padded, 2);
        assert_eq!(&dst[2..], &[0.0; 4]);
        assert_eq!(cons.shared().underrun_frames(), 2);
    }

    #[test]
    fn repeat_last_policy_repeats_final_frame() {
        let (mut prod, mut cons) = stream_buffer(16, 2);
        prod.push_samples(&[0.25, -0.25]);

        let mut dst = [0.0f32; 6];
        let outcome = cons.read_frames(&mut dst, UnderrunPolicy::RepeatLast);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.padded, 2);
        assert_eq!(dst, [0.25, -0.25, 0.25, -0.25, 0.25, -0.25]);
    }

    #[test]
    fn eof_drain_is_not_an_underrun() {
        let (mut prod, mut cons) = stream_buffer(16, 2);
        prod.push_samples(&[0.5, 0.5]);
        prod.shared().mark_eof();

        let mut dst = [1.0f32; 6];
        let outcome = cons.read_frames(&mut dst, UnderrunPolicy::RepeatLast);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.padded, 0);
        assert!(outcome.end_of_stream);
        assert_eq!(&dst[2..], &[0.0; 4]);
        assert_eq!(cons.shared().underrun_frames(), 0);
    }

    #[test]
    fn eof_revises_duration_via_frames_written() {
        let (mut prod, _cons) = stream_buffer(16, 2);
        prod.push_samples(&[0.0; 8]);
        prod.shared().mark_eof();
        assert_eq!(prod.shared().frames_written(), 4);
        assert!(prod.shared().is_eof());
    }
}
