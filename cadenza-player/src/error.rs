//! Error types for cadenza-player
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. All playback errors are local to a track or stream and
//! recoverable by moving the queue forward; only exhaustion of a playable
//! queue reaches the Stopped state with a surfaced error.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for cadenza-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio decoding errors, tagged with the offending track
    #[error("Audio decode error on track {track_id}: {message}")]
    Decode { track_id: Uuid, message: String },

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// "next"/"previous"/"play" issued against an empty queue
    #[error("Queue is empty")]
    QueueEmpty,

    /// Command rejected (out-of-range index, seek on unknown duration, ...)
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for decode errors.
    pub fn decode(track_id: Uuid, message: impl Into<String>) -> Self {
        Error::Decode {
            track_id,
            message: message.into(),
        }
    }
}

/// Convenience Result type using cadenza-player Error
pub type Result<T> = std::result::Result<T, Error>;
