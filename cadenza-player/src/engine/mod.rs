//! Playback engine
//!
//! `PlaybackEngine` is the public transport surface and orchestrator: it
//! serializes commands into the session core, runs the control task that
//! stages lookahead streams and resolves decode failures, and hands the
//! render path to the audio output.
//!
//! Threading model: the session (`PlayerCore`) lives behind one mutex.
//! Transport commands, the control task, and the audio callback each
//! take the lock briefly; decoder I/O (opening, prebuffering) and worker
//! joins always happen outside it so the render path never waits on the
//! disk. Decoder workers are separate threads that only ever touch their
//! own stream and lookahead buffer.

mod core;
pub(crate) mod worker;

use self::core::{ActiveStream, FailureOutcome, PlayerCore};
use crate::buffer::stream_buffer;
use crate::config::PlayerConfig;
use crate::decode::{DecoderBackend, OutputSpec};
use crate::error::{Error, Result};
use crate::queue::RemoveOutcome;
use cadenza_common::{EventBus, PlaybackState, PlayerEvent, RepeatMode, Track};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::worker::DecodeWorker;

/// Control task period.
const CONTROL_TICK: Duration = Duration::from_millis(50);

/// Position events are emitted at most this often.
const POSITION_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Frames buffered before a freshly opened stream goes live.
const PREBUFFER_FRAMES: usize = 8192;

/// Give up prebuffering after this long and go live with what exists.
const PREBUFFER_TIMEOUT: Duration = Duration::from_secs(2);

/// Internal notifications from decoder workers to the control task.
#[derive(Debug)]
pub(crate) enum EngineNote {
    DecodeFailed { track_id: Uuid, message: String },
}

/// Snapshot of the session for UIs and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: PlaybackState,
    pub transitioning: bool,
    pub current_track: Option<Uuid>,
    pub queue_index: Option<usize>,
    pub position_frames: Option<u64>,
    pub duration_frames: Option<u64>,
    pub queue_len: usize,
    pub history_len: usize,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub volume: f32,
}

/// The playback orchestrator.
pub struct PlaybackEngine {
    core: Mutex<PlayerCore>,
    backend: Arc<dyn DecoderBackend>,
    events: EventBus,
    notes_tx: UnboundedSender<EngineNote>,
    notes_rx: Mutex<Option<UnboundedReceiver<EngineNote>>>,
    spec: OutputSpec,
    lookahead_frames: u64,
    capacity_frames: usize,
    running: AtomicBool,
    last_position_emit: Mutex<Instant>,
}

impl PlaybackEngine {
    pub fn new(config: PlayerConfig, backend: Arc<dyn DecoderBackend>) -> Result<Arc<Self>> {
        config.validate()?;
        let events = EventBus::new(256);
        let (notes_tx, notes_rx) = mpsc::unbounded_channel();
        let spec = OutputSpec {
            sample_rate: config.audio.sample_rate,
            channels: config.audio.channels,
        };
        let lookahead = config.lookahead_frames();
        let core = PlayerCore::new(&config, events.clone());
        info!(
            "playback engine: {}Hz {}ch, crossfade {} frames ({}), lookahead {} frames",
            spec.sample_rate,
            spec.channels,
            config.crossfade_frames(),
            config.playback.fade_curve,
            lookahead
        );
        Ok(Arc::new(Self {
            core: Mutex::new(core),
            backend,
            events,
            notes_tx,
            notes_rx: Mutex::new(Some(notes_rx)),
            spec,
            lookahead_frames: lookahead as u64,
            capacity_frames: lookahead,
            running: AtomicBool::new(true),
            last_position_emit: Mutex::new(Instant::now()),
        }))
    }

    /// Output format the engine renders in.
    pub fn output_spec(&self) -> OutputSpec {
        self.spec
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Fill one interleaved output block. Called by the audio output
    /// callback (and directly by tests); never blocks on decode I/O.
    pub fn render(&self, dst: &mut [f32]) {
        self.lock_core().render(dst);
    }

    // ------------------------------------------------------------------
    // Transport commands
    // ------------------------------------------------------------------

    /// Stopped/Paused -> Playing; opens the current track if no stream
    /// is open yet.
    pub fn play(&self) -> Result<()> {
        {
            let mut core = self.lock_core();
            if core.state() == PlaybackState::Playing {
                return Ok(());
            }
            if core.has_current_stream() {
                core.set_state(PlaybackState::Playing);
                return Ok(());
            }
            core.queue.ensure_current()?;
        }
        self.switch_to_queue_current(PlaybackState::Playing)
    }

    /// Playing (transitioning included) -> Paused. Decode positions and
    /// any in-flight crossfade freeze in place.
    pub fn pause(&self) -> Result<()> {
        let mut core = self.lock_core();
        if core.state() == PlaybackState::Playing {
            core.set_state(PlaybackState::Paused);
        }
        Ok(())
    }

    pub fn toggle_play_pause(&self) -> Result<()> {
        let state = self.lock_core().state();
        match state {
            PlaybackState::Playing => self.pause(),
            _ => self.play(),
        }
    }

    /// Hard cut to the next queue candidate. An active transition is
    /// aborted, not faded out: the user asked for a new track. At the
    /// end of the queue with repeat off there is no candidate and the
    /// command is ignored.
    pub fn skip(&self) -> Result<()> {
        let state = {
            let mut core = self.lock_core();
            if core.queue.is_empty() {
                return Err(Error::QueueEmpty);
            }
            let state = core.state();
            if core.queue.advance().is_none() {
                // End of queue with repeat off: nothing to skip to, so
                // the current track keeps playing.
                debug!("skip at end of queue ignored");
                return Ok(());
            }
            core.abort_playback_streams();
            state
        };
        // Aborted decoders are released before the new target opens.
        self.reap_retired();
        if state == PlaybackState::Stopped {
            return Ok(());
        }
        self.switch_to_queue_current(state)
    }

    /// Hard cut to the previous history entry, or restart the current
    /// track when history is empty.
    pub fn previous(&self) -> Result<()> {
        let state = {
            let mut core = self.lock_core();
            if core.queue.previous().is_none() {
                return Err(Error::QueueEmpty);
            }
            let state = core.state();
            core.abort_playback_streams();
            state
        };
        self.reap_retired();
        if state == PlaybackState::Stopped {
            return Ok(());
        }
        self.switch_to_queue_current(state)
    }

    /// Seek within the current track. Aborts an active transition first;
    /// the position is clamped to the known duration.
    pub fn seek_to(&self, position_frames: u64) -> Result<()> {
        let (track, target) = {
            let core = self.lock_core();
            if core.state() == PlaybackState::Stopped {
                return Err(Error::InvalidCommand("seek while stopped".into()));
            }
            let track = core
                .current_track()
                .ok_or_else(|| Error::InvalidCommand("seek with no current track".into()))?;
            let duration = core
                .current_duration()
                .or(track.duration_frames)
                .ok_or_else(|| {
                    Error::InvalidCommand("seek on a stream with unknown duration".into())
                })?;
            (track, position_frames.min(duration))
        };
        let stream = self.open_stream(&track, target)?;
        {
            let mut core = self.lock_core();
            core.replace_current(stream);
        }
        self.reap_retired();
        debug!("seek to frame {}", target);
        Ok(())
    }

    pub fn set_shuffle(&self, enabled: bool) -> Result<()> {
        let mut core = self.lock_core();
        core.queue.set_shuffle(enabled);
        core.discard_incoming_if_stale();
        core.emit_queue_changed();
        Ok(())
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        let mut core = self.lock_core();
        core.queue.set_repeat(mode);
        core.discard_incoming_if_stale();
        Ok(())
    }

    /// Master volume, clamped to 0.0..=1.0.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(Error::InvalidCommand("volume must be finite".into()));
        }
        self.lock_core().set_volume(volume);
        Ok(())
    }

    /// Append a track produced by an external collaborator.
    pub fn enqueue(&self, track: Track) -> Result<()> {
        let mut core = self.lock_core();
        core.queue.push(Arc::new(track));
        core.discard_incoming_if_stale();
        core.emit_queue_changed();
        Ok(())
    }

    /// Insert a track at a queue position (clamped to the queue length).
    pub fn insert_at(&self, index: usize, track: Track) -> Result<()> {
        let mut core = self.lock_core();
        core.queue.insert(index, Arc::new(track));
        core.discard_incoming_if_stale();
        core.emit_queue_changed();
        Ok(())
    }

    /// Remove a queue entry. Removing the currently playing entry forces
    /// a hard transition to the next candidate (or stops playback).
    pub fn remove_from_queue(&self, index: usize) -> Result<()> {
        let (was_current, has_replacement, state) = {
            let mut core = self.lock_core();
            let RemoveOutcome {
                was_current,
                replacement,
                ..
            } = core.queue.remove(index)?;
            core.emit_queue_changed();
            let state = core.state();
            if was_current {
                core.abort_playback_streams();
                if replacement.is_none() {
                    core.stop_playback();
                }
            } else {
                core.discard_incoming_if_stale();
            }
            (was_current, replacement.is_some(), state)
        };
        self.reap_retired();
        if was_current && has_replacement && state != PlaybackState::Stopped {
            self.switch_to_queue_current(state)?;
        }
        Ok(())
    }

    /// Move a queue entry, preserving the relative order of the rest.
    pub fn reorder_queue(&self, from: usize, to: usize) -> Result<()> {
        let mut core = self.lock_core();
        core.queue.reorder(from, to)?;
        core.discard_incoming_if_stale();
        core.emit_queue_changed();
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        let core = self.lock_core();
        EngineStatus {
            state: core.state(),
            transitioning: core.transitioning(),
            current_track: core.current_track().map(|t| t.id),
            queue_index: core.queue.current_index(),
            position_frames: core.position_frames(),
            duration_frames: core.current_duration(),
            queue_len: core.queue.len(),
            history_len: core.queue.history_len(),
            shuffle: core.queue.shuffle_enabled(),
            repeat: core.queue.repeat_mode(),
            volume: core.volume(),
        }
    }

    // ------------------------------------------------------------------
    // Control task
    // ------------------------------------------------------------------

    /// Run the control task until shutdown. Worker failure notes wake it
    /// early; otherwise it runs every `CONTROL_TICK`.
    pub fn spawn_control_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut notes_rx = engine
            .notes_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("control loop already running");
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(CONTROL_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while engine.running.load(Ordering::Acquire) {
                tokio::select! {
                    _ = tick.tick() => {}
                    note = notes_rx.recv() => {
                        if let Some(EngineNote::DecodeFailed { track_id, message }) = note {
                            warn!("decode failure reported: {}: {}", track_id, message);
                        }
                    }
                }
                engine.pump();
            }
            debug!("control loop exited");
        })
    }

    /// One control iteration: resolve failures, stage the lookahead
    /// stream, surface underruns, emit position ticks, join retired
    /// workers. Exposed so tests can drive the engine without timers.
    pub fn pump(&self) {
        // Failure notes are wake-ups; the stream flags carry the truth.
        let outcome = self.lock_core().resolve_failures();
        match outcome {
            FailureOutcome::OpenNext(_) => {
                // The queue already points at the substitute.
                let state = self.lock_core().state();
                if state != PlaybackState::Stopped {
                    if let Err(e) = self.switch_to_queue_current(state) {
                        warn!("failed to recover playback: {}", e);
                    }
                }
            }
            FailureOutcome::Stopped | FailureOutcome::None => {}
        }

        // Stage the next track once the position enters the lookahead
        // window (or a gapless advance is overdue).
        let (target, pending) = {
            let mut core = self.lock_core();
            (
                core.stage_target(self.lookahead_frames),
                core.pending_advance(),
            )
        };
        match target {
            Some(track) => match self.open_stream(&track, 0) {
                Ok(stream) => self.lock_core().install_incoming(stream),
                Err(e) => {
                    warn!("failed to stage {}: {}", track.id, e);
                    let mut core = self.lock_core();
                    core.emit_decode_error_for(&track);
                    if let Some(idx) = core.queue.index_of(track.id) {
                        if core.queue.current_index() != Some(idx)
                            && core.queue.remove(idx).is_ok()
                        {
                            core.emit_queue_changed();
                        }
                    }
                }
            },
            None if pending => {
                // The current track ended and nothing is left to stage.
                let mut core = self.lock_core();
                if core.state() == PlaybackState::Playing && core.queue.peek_next().is_none() {
                    core.stop_playback();
                }
            }
            None => {}
        }

        self.lock_core().emit_underruns();
        self.reap_retired();

        let due = {
            let mut last = self
                .last_position_emit
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if last.elapsed() >= POSITION_TICK_INTERVAL {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            self.lock_core().emit_position_tick();
        }
    }

    /// Stop playback and release all decoder resources.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.lock_core().stop_playback();
        self.reap_retired();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock_core(&self) -> MutexGuard<'_, PlayerCore> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join workers retired by the render or control paths. Runs outside
    /// the core lock so the audio callback is never blocked on a join.
    fn reap_retired(&self) {
        let retired = self.lock_core().take_retired();
        for mut worker in retired {
            worker.stop_and_join();
        }
    }

    /// Open whatever the queue says is current and make it the active
    /// stream, dropping unplayable entries along the way. Exhausting the
    /// queue this way stops playback and surfaces the last open error.
    fn switch_to_queue_current(&self, state: PlaybackState) -> Result<()> {
        let mut last_err: Option<Error> = None;
        loop {
            let target = self.lock_core().queue.current();
            let Some(track) = target else {
                let mut core = self.lock_core();
                core.stop_playback();
                drop(core);
                self.reap_retired();
                return match last_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
            };
            match self.open_stream(&track, 0) {
                Ok(stream) => {
                    let mut core = self.lock_core();
                    core.replace_current(stream);
                    core.set_state(state);
                    core.emit_track_changed();
                    drop(core);
                    self.reap_retired();
                    return Ok(());
                }
                Err(e) => {
                    warn!("unplayable track {}: {}", track.id, e);
                    let mut core = self.lock_core();
                    core.emit_decode_error_for(&track);
                    if let Some(idx) = core.queue.current_index() {
                        if core.queue.remove(idx).is_ok() {
                            core.emit_queue_changed();
                            last_err = Some(e);
                            continue;
                        }
                    }
                    core.stop_playback();
                    drop(core);
                    self.reap_retired();
                    return Err(e);
                }
            }
        }
    }

    /// Open a decode stream, spawn its worker, and prebuffer enough
    /// frames that the render path has material to pull immediately.
    fn open_stream(&self, track: &Arc<Track>, start_frame: u64) -> Result<ActiveStream> {
        let mut stream = self.backend.open(track)?;
        if start_frame > 0 {
            stream.seek(start_frame)?;
        }
        let duration_hint = stream
            .duration_frames()
            .or(track.duration_frames);

        let (producer, consumer) = stream_buffer(self.capacity_frames, self.spec.channels as usize);
        let worker = DecodeWorker::spawn(track.id, stream, producer, self.notes_tx.clone());

        let target = PREBUFFER_FRAMES.min(self.capacity_frames / 2).max(1);
        let deadline = Instant::now() + PREBUFFER_TIMEOUT;
        let shared = Arc::clone(consumer.shared());
        while consumer.buffered_frames() < target
            && !shared.is_eof()
            && !shared.is_failed()
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(1));
        }
        if shared.is_failed() {
            return Err(Error::decode(track.id, "stream failed while prebuffering"));
        }

        Ok(ActiveStream {
            track: Arc::clone(track),
            consumer,
            worker,
            position_frames: start_frame,
            duration_hint,
            base_frame: start_frame,
            underruns_reported: 0,
            failure_handled: false,
        })
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
