//! Event types for the Cadenza playback core
//!
//! The engine publishes notifications on an `EventBus`; consumers (UI,
//! historians, platform integration) subscribe independently. Events are
//! fire-and-forget: the engine never waits on a consumer, and a bus with
//! no subscribers is not an error.

use crate::types::PlaybackState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Playback core event types
///
/// Serializable (tagged enum) so a UI collaborator can forward them over
/// any transport without re-encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Transport state machine moved between Stopped/Playing/Paused
    StateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A crossfade window opened (Playing sub-state entered)
    TransitionStarted {
        outgoing: Uuid,
        incoming: Uuid,
        /// Transition length actually scheduled, after clamping
        duration_frames: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The current track changed (transition completed, skip, previous,
    /// or forced advance after a queue edit)
    TrackChanged {
        track_id: Uuid,
        /// Position of the track in the user-authored queue order
        queue_index: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Periodic progress report for the UI progress bar
    PositionTick {
        track_id: Uuid,
        position_frames: u64,
        duration_frames: Option<u64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents or ordering changed
    QueueChanged {
        queue_len: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A stream failed to decode; the track was closed and skipped
    DecodeError {
        track_id: Uuid,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A decoder worker fell behind the output clock
    BufferUnderrun {
        track_id: Uuid,
        /// Cumulative underrun frame count for this stream
        total_frames: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Master volume changed
    VolumeChanged {
        volume: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Event name for logging and dispatch
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::TransitionStarted { .. } => "TransitionStarted",
            PlayerEvent::TrackChanged { .. } => "TrackChanged",
            PlayerEvent::PositionTick { .. } => "PositionTick",
            PlayerEvent::QueueChanged { .. } => "QueueChanged",
            PlayerEvent::DecodeError { .. } => "DecodeError",
            PlayerEvent::BufferUnderrun { .. } => "BufferUnderrun",
            PlayerEvent::VolumeChanged { .. } => "VolumeChanged",
        }
    }
}

/// Broadcast bus carrying `PlayerEvent`s from the engine to subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event.
    ///
    /// Safe to call from the audio render path: `broadcast::Sender::send`
    /// never blocks. A send with zero subscribers is silently dropped.
    pub fn emit(&self, event: PlayerEvent) {
        trace!("emit {}", event.event_type());
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(PlayerEvent::VolumeChanged {
            volume: 0.5,
            timestamp: chrono::Utc::now(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "VolumeChanged");
    }

    #[test]
    fn emit_without_subscribers_is_ok() {
        let bus = EventBus::new(16);
        bus.emit(PlayerEvent::QueueChanged {
            queue_len: 0,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = PlayerEvent::VolumeChanged {
            volume: 1.0,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"VolumeChanged\""));
    }
}
