//! Crossfade transitions
//!
//! A `Transition` owns the time-domain mix of the outgoing and incoming
//! streams for one crossfade window. The window length is fixed at
//! creation (already clamped by the engine against both stream
//! durations); the transition only tracks elapsed frames and applies the
//! gain envelopes, sample-wise, with clipping to the valid output range.
//!
//! The transition record is ephemeral: dropped on completion or on abort
//! (skip/previous/seek), in which case no fade-out is applied to the
//! surviving stream.

use cadenza_common::FadeCurve;

/// An in-flight crossfade between two streams.
#[derive(Debug)]
pub struct Transition {
    /// Window length in output frames (>= 1)
    duration_frames: u64,

    /// Frames mixed so far
    elapsed_frames: u64,

    /// Gain curve for both envelope sides
    curve: FadeCurve,

    /// The outgoing stream ended before the window did (its duration
    /// estimate was optimistic); remaining window is 100% incoming.
    outgoing_ended: bool,
}

impl Transition {
    pub fn new(duration_frames: u64, curve: FadeCurve) -> Self {
        Self {
            duration_frames: duration_frames.max(1),
            elapsed_frames: 0,
            curve,
            outgoing_ended: false,
        }
    }

    pub fn duration_frames(&self) -> u64 {
        self.duration_frames
    }

    pub fn elapsed_frames(&self) -> u64 {
        self.elapsed_frames
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed_frames >= self.duration_frames
    }

    /// Premature end of the outgoing stream: stop trusting its samples
    /// and hand the rest of the window to the incoming stream at full
    /// gain.
    pub fn mark_outgoing_ended(&mut self) {
        self.outgoing_ended = true;
    }

    /// Mix one block.
    ///
    /// `outgoing` and `incoming` are interleaved blocks sized for `dst`;
    /// shorter inputs are treated as silence. Advances the elapsed clock
    /// by the block's frame count.
    pub fn mix_into(
        &mut self,
        outgoing: &[f32],
        incoming: &[f32],
        dst: &mut [f32],
        channels: usize,
    ) {
        let frames = dst.len() / channels;
        let duration = self.duration_frames as f32;

        for f in 0..frames {
            let (g_out, g_in) = if self.outgoing_ended {
                (0.0, 1.0)
            } else {
                let t = ((self.elapsed_frames + f as u64) as f32 / duration).min(1.0);
                (self.curve.fade_out(t), self.curve.fade_in(t))
            };
            for c in 0..channels {
                let i = f * channels + c;
                let a = outgoing.get(i).copied().unwrap_or(0.0);
                let b = incoming.get(i).copied().unwrap_or(0.0);
                dst[i] = (a * g_out + b * g_in).clamp(-1.0, 1.0);
            }
        }
        self.elapsed_frames += frames as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_mix_of_equal_dc_is_unity() {
        // With g_in + g_out == 1, mixing two DC streams of 1.0 gives 1.0
        // at every sampled instant.
        let mut tr = Transition::new(100, FadeCurve::Linear);
        let outgoing = vec![1.0f32; 200];
        let incoming = vec![1.0f32; 200];
        let mut dst = vec![0.0f32; 200];
        tr.mix_into(&outgoing, &incoming, &mut dst, 2);
        for (i, s) in dst.iter().enumerate() {
            assert!((s - 1.0).abs() < 1e-5, "sample {}: {}", i, s);
        }
        assert!(tr.is_complete());
    }

    #[test]
    fn elapsed_advances_per_block() {
        let mut tr = Transition::new(10, FadeCurve::Linear);
        let silence = vec![0.0f32; 8];
        let mut dst = vec![0.0f32; 8];
        tr.mix_into(&silence, &silence, &mut dst, 2);
        assert_eq!(tr.elapsed_frames(), 4);
        assert!(!tr.is_complete());
        tr.mix_into(&silence, &silence, &mut dst, 2);
        tr.mix_into(&silence, &silence, &mut dst, 2);
        assert_eq!(tr.elapsed_frames(), 12);
        assert!(tr.is_complete());
    }

    #[test]
    fn short_inputs_are_zero_padded() {
        let mut tr = Transition::new(4, FadeCurve::Linear);
        // outgoing supplies only the first frame of the block
        let outgoing = vec![1.0f32; 2];
        let incoming: Vec<f32> = vec![];
        let mut dst = vec![9.0f32; 8];
        tr.mix_into(&outgoing, &incoming, &mut dst, 2);
        // frame 0: t=0, g_out=1 -> 1.0; frames 1..: no outgoing samples -> 0
        assert!((dst[0] - 1.0).abs() < 1e-6);
        assert!((dst[1] - 1.0).abs() < 1e-6);
        assert_eq!(&dst[2..], &[0.0; 6]);
    }

    #[test]
    fn outgoing_ended_hands_window_to_incoming() {
        let mut tr = Transition::new(100, FadeCurve::Linear);
        tr.mark_outgoing_ended();
        let outgoing = vec![1.0f32; 4];
        let incoming = vec![0.5f32; 4];
        let mut dst = vec![0.0f32; 4];
        tr.mix_into(&outgoing, &incoming, &mut dst, 2);
        // mid-window the incoming would normally be attenuated; after the
        // outgoing ends it plays at full gain
        assert_eq!(dst, [0.5, 0.5, 0.5, 0.5].as_slice());
    }

    #[test]
    fn mixed_output_is_clipped() {
        let mut tr = Transition::new(2, FadeCurve::Linear);
        tr.mark_outgoing_ended();
        let incoming = vec![1.5f32; 2];
        let mut dst = vec![0.0f32; 2];
        tr.mix_into(&[], &incoming, &mut dst, 2);
        assert_eq!(dst, [1.0, 1.0].as_slice());
    }
}
