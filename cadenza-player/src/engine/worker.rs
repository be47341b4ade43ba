//! Decoder worker threads
//!
//! One worker per open stream: pulls fixed-size frame blocks from the
//! decode stream and pushes them into the stream's lookahead buffer,
//! pausing briefly whenever the buffer is near capacity. The output
//! path never waits on a worker; it only pops from the buffer.
//!
//! Workers own their stream handle exclusively and never touch queue or
//! session state; they report failures over the engine note channel.

use crate::buffer::{BufferProducer, StreamShared};
use crate::decode::DecodeStream;
use crate::engine::EngineNote;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

/// Frames decoded per worker iteration.
pub(crate) const DECODE_BLOCK_FRAMES: usize = 4096;

/// Sleep while the lookahead buffer is near capacity.
const FULL_BUFFER_BACKOFF: Duration = Duration::from_millis(5);

/// Handle to a running decoder worker.
pub(crate) struct DecodeWorker {
    handle: Option<JoinHandle<()>>,
    shared: Arc<StreamShared>,
}

impl DecodeWorker {
    /// Spawn a worker filling `producer` from `stream`.
    pub(crate) fn spawn(
        track_id: Uuid,
        mut stream: Box<dyn DecodeStream>,
        mut producer: BufferProducer,
        notes: UnboundedSender<EngineNote>,
    ) -> Self {
        let shared = Arc::clone(producer.shared());
        let handle = std::thread::Builder::new()
            .name(format!("decode-{}", &track_id.to_string()[..8]))
            .spawn(move || {
                debug!("decode worker started: {}", track_id);
                loop {
                    if producer.shared().stop_requested() {
                        break;
                    }
                    // Size reads to free space so small buffers still fill.
                    let free = producer.free_frames();
                    if free == 0 {
                        std::thread::sleep(FULL_BUFFER_BACKOFF);
                        continue;
                    }
                    match stream.read_frames(free.min(DECODE_BLOCK_FRAMES)) {
                        Ok(block) if block.is_empty() => {
                            // Authoritative end of stream; frames_written
                            // becomes the revised duration.
                            producer.shared().mark_eof();
                            debug!(
                                "decode worker eof: {} ({} frames)",
                                track_id,
                                producer.shared().frames_written()
                            );
                            break;
                        }
                        Ok(block) => {
                            producer.push_samples(&block.samples);
                        }
                        Err(e) => {
                            warn!("decode worker failed: {}: {}", track_id, e);
                            producer.shared().mark_failed();
                            let _ = notes.send(EngineNote::DecodeFailed {
                                track_id,
                                message: e.to_string(),
                            });
                            break;
                        }
                    }
                }
                debug!("decode worker exited: {}", track_id);
            })
            .expect("failed to spawn decode worker thread");
        Self {
            handle: Some(handle),
            shared,
        }
    }

    /// Ask the worker to stop and wait for it to release the decoder.
    ///
    /// Bounded: the worker checks the stop flag every iteration and all
    /// decode calls are local, synchronous operations.
    pub(crate) fn stop_and_join(&mut self) {
        self.shared.request_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
