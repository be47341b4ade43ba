//! Playback session core
//!
//! `PlayerCore` is the single mutable playback session: the transport
//! state machine, the queue, the active (and staged incoming) streams,
//! and the in-flight transition. Every mutation funnels through one
//! mutex held by the transport commands, the control task, and the audio
//! render callback, so command/completion ordering is deterministic.
//!
//! The render path is allocation- and I/O-free after warmup: it pops
//! frames from lookahead buffers, mixes the crossfade window, and applies
//! the master volume. Opening decoders and joining worker threads happen
//! on the control path only.

use crate::buffer::BufferConsumer;
use crate::config::PlayerConfig;
use crate::crossfade::Transition;
use crate::decode::OutputSpec;
use crate::engine::worker::DecodeWorker;
use crate::queue::QueueManager;
use cadenza_common::{EventBus, FadeCurve, PlaybackState, PlayerEvent, Track, UnderrunPolicy};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One stream being played or staged: the consumer half of its lookahead
/// buffer plus the worker filling the other half.
pub(crate) struct ActiveStream {
    pub track: Arc<Track>,
    pub consumer: BufferConsumer,
    pub worker: DecodeWorker,

    /// Playback position in output frames (frames actually consumed)
    pub position_frames: u64,

    /// Duration estimate in output frames (stream metadata, falling back
    /// to the track's hint)
    pub duration_hint: Option<u64>,

    /// Frame the worker started decoding at (non-zero after a seek)
    pub base_frame: u64,

    /// Underrun frames already surfaced via events
    pub underruns_reported: u64,

    /// A decode failure on this stream was already acted on
    pub failure_handled: bool,
}

impl ActiveStream {
    /// Best known duration: exact once the worker hits end of stream,
    /// otherwise the metadata estimate.
    pub fn effective_duration(&self) -> Option<u64> {
        if self.consumer.shared().is_eof() {
            Some(self.base_frame + self.consumer.shared().frames_written())
        } else {
            self.duration_hint
        }
    }

    pub fn remaining_frames(&self) -> Option<u64> {
        self.effective_duration()
            .map(|d| d.saturating_sub(self.position_frames))
    }

    pub fn failed(&self) -> bool {
        self.consumer.shared().is_failed()
    }
}

/// What the control path must do after decode failures were resolved.
pub(crate) enum FailureOutcome {
    /// Nothing left to do
    None,
    /// The current stream died; open this substitute as the new current
    OpenNext(Arc<Track>),
    /// No candidate left; the engine stopped
    Stopped,
}

/// The playback session (state machine, queue, streams, transition).
pub(crate) struct PlayerCore {
    spec: OutputSpec,
    crossfade_frames: u64,
    curve: FadeCurve,
    underrun_policy: UnderrunPolicy,

    pub(crate) queue: QueueManager,
    state: PlaybackState,
    current: Option<ActiveStream>,
    incoming: Option<ActiveStream>,
    transition: Option<Transition>,
    volume: f32,
    events: EventBus,

    /// Workers awaiting a join on the control path (the render callback
    /// must never block on a thread join)
    retired: Vec<DecodeWorker>,

    /// The current track ended with a next available but nothing staged;
    /// the control task opens and promotes it
    pending_advance: bool,

    scratch_out: Vec<f32>,
    scratch_in: Vec<f32>,
}

impl PlayerCore {
    pub(crate) fn new(config: &PlayerConfig, events: EventBus) -> Self {
        Self {
            spec: OutputSpec {
                sample_rate: config.audio.sample_rate,
                channels: config.audio.channels,
            },
            crossfade_frames: config.crossfade_frames(),
            curve: config.playback.fade_curve,
            underrun_policy: config.buffer.underrun,
            queue: QueueManager::new(config.queue.history_depth),
            state: PlaybackState::Stopped,
            current: None,
            incoming: None,
            transition: None,
            volume: config.playback.volume.clamp(0.0, 1.0),
            events,
            retired: Vec::new(),
            pending_advance: false,
            scratch_out: Vec::new(),
            scratch_in: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> PlaybackState {
        self.state
    }

    pub(crate) fn volume(&self) -> f32 {
        self.volume
    }

    pub(crate) fn transitioning(&self) -> bool {
        self.transition.is_some()
    }

    pub(crate) fn pending_advance(&self) -> bool {
        self.pending_advance
    }

    pub(crate) fn current_track(&self) -> Option<Arc<Track>> {
        self.current.as_ref().map(|s| Arc::clone(&s.track))
    }

    pub(crate) fn position_frames(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.position_frames)
    }

    pub(crate) fn current_duration(&self) -> Option<u64> {
        self.current.as_ref().and_then(|s| s.effective_duration())
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.volume = volume;
        self.events.emit(PlayerEvent::VolumeChanged {
            volume,
            timestamp: chrono::Utc::now(),
        });
    }

    pub(crate) fn set_state(&mut self, new_state: PlaybackState) {
        if self.state == new_state {
            return;
        }
        info!("playback state: {} -> {}", self.state, new_state);
        let old_state = self.state;
        self.state = new_state;
        self.events.emit(PlayerEvent::StateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }

    pub(crate) fn emit_queue_changed(&self) {
        self.events.emit(PlayerEvent::QueueChanged {
            queue_len: self.queue.len(),
            timestamp: chrono::Utc::now(),
        });
    }

    pub(crate) fn emit_track_changed(&self) {
        if let Some(track) = self.current_track() {
            self.events.emit(PlayerEvent::TrackChanged {
                track_id: track.id,
                queue_index: self.queue.current_index().unwrap_or(0),
                timestamp: chrono::Utc::now(),
            });
        }
    }

    pub(crate) fn emit_position_tick(&self) {
        if let Some(stream) = &self.current {
            if self.state != PlaybackState::Stopped {
                self.events.emit(PlayerEvent::PositionTick {
                    track_id: stream.track.id,
                    position_frames: stream.position_frames,
                    duration_frames: stream.effective_duration(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    /// Surface underrun counters that grew since the last report.
    pub(crate) fn emit_underruns(&mut self) {
        for stream in [&mut self.current, &mut self.incoming].into_iter().flatten() {
            let total = stream.consumer.shared().underrun_frames();
            if total > stream.underruns_reported {
                stream.underruns_reported = total;
                self.events.emit(PlayerEvent::BufferUnderrun {
                    track_id: stream.track.id,
                    total_frames: total,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Render path (called from the audio output callback)
    // ------------------------------------------------------------------

    /// Fill one interleaved output block.
    ///
    /// Paused and Stopped produce silence without consuming from any
    /// stream, so decode positions and any in-flight transition stay
    /// frozen across pause/resume.
    pub(crate) fn render(&mut self, dst: &mut [f32]) {
        dst.fill(0.0);
        if self.state != PlaybackState::Playing || self.current.is_none() {
            return;
        }

        self.maybe_start_transition();

        let channels = self.spec.channels as usize;
        if self.transition.is_some() {
            self.render_transition(dst, channels);
        } else {
            self.render_single(dst);
        }

        if (self.volume - 1.0).abs() > f32::EPSILON {
            for s in dst.iter_mut() {
                *s *= self.volume;
            }
        }
    }

    fn render_single(&mut self, dst: &mut [f32]) {
        let policy = self.underrun_policy;
        let channels = self.spec.channels as usize;
        let mut offset = 0;
        while offset < dst.len() {
            let Some(stream) = self.current.as_mut() else {
                break;
            };
            let outcome = stream.consumer.read_frames(&mut dst[offset..], policy);
            stream.position_frames += outcome.delivered as u64;
            offset += outcome.delivered * channels;
            let failed = stream.failed();
            if outcome.end_of_stream && !failed {
                // If a staged stream gets promoted, the rest of the block
                // continues from it with no gap.
                if self.handle_current_ended() {
                    continue;
                }
            }
            // A failed stream plays out its buffered frames, then goes
            // silent until the control path resolves the failure.
            break;
        }
    }

    fn render_transition(&mut self, dst: &mut [f32], channels: usize) {
        let policy = self.underrun_policy;
        self.scratch_out.resize(dst.len(), 0.0);
        self.scratch_in.resize(dst.len(), 0.0);

        let (Some(cur), Some(inc), Some(tr)) = (
            self.current.as_mut(),
            self.incoming.as_mut(),
            self.transition.as_mut(),
        ) else {
            // A transition with a missing side cannot mix; drop it.
            self.transition = None;
            return;
        };

        let out_res = cur.consumer.read_frames(&mut self.scratch_out, policy);
        let in_res = inc.consumer.read_frames(&mut self.scratch_in, policy);
        cur.position_frames += out_res.delivered as u64;
        inc.position_frames += in_res.delivered as u64;

        // Premature outgoing end (optimistic duration estimate or decode
        // failure): remaining window is 100% incoming.
        if out_res.end_of_stream {
            tr.mark_outgoing_ended();
        }
        tr.mix_into(&self.scratch_out, &self.scratch_in, dst, channels);

        if tr.is_complete() {
            self.complete_transition();
        }
    }

    /// Open the crossfade window once the current track's remaining time
    /// fits inside it and the incoming stream is staged.
    fn maybe_start_transition(&mut self) {
        if self.transition.is_some() || self.crossfade_frames == 0 {
            return;
        }
        let (Some(cur), Some(inc)) = (self.current.as_ref(), self.incoming.as_ref()) else {
            return;
        };
        let Some(remaining) = cur.remaining_frames() else {
            // Unknown duration: no schedulable window; the track ends
            // with a gapless hard advance instead.
            return;
        };

        // The window ends exactly at the outgoing track's natural
        // boundary, and never crossfades past the incoming track's end:
        // a short incoming track shrinks the window, which delays the
        // start rather than cutting the outgoing track early.
        let mut window = self.crossfade_frames;
        if let Some(incoming_len) = inc.effective_duration() {
            window = window.min(incoming_len);
        }
        if window == 0 || remaining == 0 || remaining > window {
            return;
        }
        let duration = remaining;

        debug!(
            "transition: {} -> {} over {} frames",
            cur.track.id, inc.track.id, duration
        );
        self.events.emit(PlayerEvent::TransitionStarted {
            outgoing: cur.track.id,
            incoming: inc.track.id,
            duration_frames: duration,
            timestamp: chrono::Utc::now(),
        });
        self.transition = Some(Transition::new(duration, self.curve));
    }

    /// The window elapsed: commit the queue advance (sole caller) and
    /// promote the incoming stream.
    fn complete_transition(&mut self) {
        debug!("transition complete");
        self.transition = None;
        self.promote_incoming();
    }

    /// The current stream drained outside a transition. Returns true when
    /// a staged stream was promoted in its place.
    fn handle_current_ended(&mut self) -> bool {
        if self.incoming.is_some() {
            // Next track staged but no crossfade window was schedulable
            // (crossfade disabled or unknown duration): gapless advance.
            self.promote_incoming();
            true
        } else if self.queue.peek_next().is_some() {
            // Lookahead missed (very short track or slow open); the
            // control task stages and promotes it.
            self.pending_advance = true;
            false
        } else {
            debug!("queue exhausted");
            self.stop_playback();
            false
        }
    }

    /// Advance the queue and make the staged incoming stream current.
    fn promote_incoming(&mut self) {
        let Some(incoming) = self.incoming.take() else {
            warn!("promote_incoming without a staged stream");
            return;
        };
        self.transition = None;
        self.pending_advance = false;
        if let Some(old) = self.current.take() {
            self.retire_stream(old);
        }
        if self.queue.index_of(incoming.track.id).is_some() {
            self.queue.advance();
            // Queue edits during the window may have moved the committed
            // track; re-resolve by identity.
            self.queue.resync_current(incoming.track.id);
        } else {
            // The committed entry was removed during the window. The
            // current index already names what follows it, so advancing
            // here would skip a track.
            debug!("committed track no longer queued: {}", incoming.track.id);
        }
        self.current = Some(incoming);
        self.emit_track_changed();
    }

    /// Move to Stopped and release all streams (workers joined later by
    /// the control path).
    pub(crate) fn stop_playback(&mut self) {
        self.transition = None;
        self.pending_advance = false;
        if let Some(s) = self.current.take() {
            self.retire_stream(s);
        }
        if let Some(s) = self.incoming.take() {
            self.retire_stream(s);
        }
        self.set_state(PlaybackState::Stopped);
    }

    fn retire_stream(&mut self, stream: ActiveStream) {
        // Consumer and track drop here; the worker still needs a join.
        self.retired.push(stream.worker);
    }

    // ------------------------------------------------------------------
    // Control path (engine commands and the control task)
    // ------------------------------------------------------------------

    /// Drop every active stream and any transition (hard cut); the
    /// workers land in the retired list for the caller to join.
    pub(crate) fn abort_playback_streams(&mut self) {
        self.transition = None;
        self.pending_advance = false;
        if let Some(s) = self.current.take() {
            self.retire_stream(s);
        }
        if let Some(s) = self.incoming.take() {
            self.retire_stream(s);
        }
    }

    /// Drop the staged incoming stream when a queue edit changed what
    /// comes next. A stream being mixed mid-window is committed, not
    /// staged, and is never discarded here.
    pub(crate) fn discard_incoming_if_stale(&mut self) {
        if self.transition.is_some() {
            return;
        }
        let stale = match &self.incoming {
            Some(inc) => self.queue.peek_next().map(|t| t.id) != Some(inc.track.id),
            None => false,
        };
        if stale {
            if let Some(s) = self.incoming.take() {
                debug!("staged stream invalidated by queue edit: {}", s.track.id);
                self.retire_stream(s);
            }
        }
    }

    /// Replace the current stream after skip/previous/seek/forced
    /// switches. State is untouched; the caller decides Playing/Paused.
    pub(crate) fn replace_current(&mut self, stream: ActiveStream) {
        self.abort_playback_streams();
        self.current = Some(stream);
    }

    pub(crate) fn has_current_stream(&self) -> bool {
        self.current.is_some()
    }

    /// Workers ready for a join on the control path.
    pub(crate) fn take_retired(&mut self) -> Vec<DecodeWorker> {
        std::mem::take(&mut self.retired)
    }

    /// The track the control task should open next, if the playback
    /// position entered the lookahead window (or a gapless advance is
    /// overdue).
    pub(crate) fn stage_target(&mut self, lookahead_frames: u64) -> Option<Arc<Track>> {
        if self.state != PlaybackState::Playing {
            return None;
        }
        if self.transition.is_some() || self.incoming.is_some() {
            return None;
        }
        if self.pending_advance {
            return self.queue.peek_next();
        }
        let cur = self.current.as_ref()?;
        if cur.failed() {
            return None;
        }
        let remaining = cur.remaining_frames()?;
        if remaining <= self.crossfade_frames + lookahead_frames {
            self.queue.peek_next()
        } else {
            None
        }
    }

    /// Install a freshly opened stream as the staged incoming, unless
    /// the world changed while it was being opened.
    pub(crate) fn install_incoming(&mut self, stream: ActiveStream) {
        let still_wanted = self.state == PlaybackState::Playing
            && self.incoming.is_none()
            && self.current.is_some()
            && self.queue.peek_next().map(|t| t.id) == Some(stream.track.id);
        if !still_wanted {
            debug!("staged stream no longer wanted: {}", stream.track.id);
            self.retire_stream(stream);
            return;
        }
        self.incoming = Some(stream);
        if self.pending_advance {
            // The current track already ended; promote immediately.
            self.promote_incoming();
        }
    }

    /// Resolve decode failures flagged by the workers.
    pub(crate) fn resolve_failures(&mut self) -> FailureOutcome {
        // Incoming side: abort the transition, stay on the outgoing
        // stream at full gain, and drop the failed queue entry so the
        // next lookahead pass finds a substitute.
        let incoming_failed = self
            .incoming
            .as_ref()
            .map(|s| s.failed())
            .unwrap_or(false);
        if incoming_failed {
            let stream = self.incoming.take().expect("checked above");
            self.transition = None;
            warn!("incoming stream failed: {}", stream.track.id);
            self.emit_decode_error(&stream);
            let track_id = stream.track.id;
            self.retire_stream(stream);
            if let Some(idx) = self.queue.index_of(track_id) {
                if self.queue.current_index() != Some(idx) {
                    if self.queue.remove(idx).is_ok() {
                        self.emit_queue_changed();
                    }
                }
            }
        }

        // Current side.
        let current_failed = self
            .current
            .as_ref()
            .map(|s| s.failed() && !s.failure_handled)
            .unwrap_or(false);
        if current_failed {
            if self.transition.is_some() {
                // Outgoing failure mid-crossfade: full incoming gain for
                // the rest of the window; the stream retires at
                // completion as usual.
                if let (Some(stream), Some(tr)) = (self.current.as_mut(), self.transition.as_mut())
                {
                    warn!("outgoing stream failed mid-transition: {}", stream.track.id);
                    tr.mark_outgoing_ended();
                    stream.failure_handled = true;
                }
                let stream_info = self.current.as_ref().expect("present in this branch");
                let event_track = Arc::clone(&stream_info.track);
                self.emit_decode_error_for(&event_track);
            } else {
                let stream = self.current.take().expect("checked above");
                warn!("current stream failed: {}", stream.track.id);
                self.emit_decode_error(&stream);
                self.retire_stream(stream);
                // Drop the unplayable entry and move the queue forward.
                if let Some(idx) = self.queue.current_index() {
                    if let Ok(outcome) = self.queue.remove(idx) {
                        self.emit_queue_changed();
                        if let Some(replacement) = outcome.replacement {
                            return FailureOutcome::OpenNext(replacement);
                        }
                    }
                }
                self.stop_playback();
                return FailureOutcome::Stopped;
            }
        }
        FailureOutcome::None
    }

    fn emit_decode_error(&self, stream: &ActiveStream) {
        self.emit_decode_error_for(&stream.track);
    }

    pub(crate) fn emit_decode_error_for(&self, track: &Arc<Track>) {
        self.events.emit(PlayerEvent::DecodeError {
            track_id: track.id,
            message: "stream decode failure".into(),
            timestamp: chrono::Utc::now(),
        });
    }
}
