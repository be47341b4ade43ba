//! # Cadenza Common (cadenza-common)
//!
//! Shared vocabulary for the Cadenza playback core and its collaborators
//! (UI, library scanner, download pipeline).
//!
//! **Purpose:** Track records, playback/repeat state enums, the outbound
//! event bus, and the fade curves used for crossfade envelopes.

pub mod events;
pub mod fade_curves;
pub mod track;
pub mod types;

pub use events::{EventBus, PlayerEvent};
pub use fade_curves::FadeCurve;
pub use track::Track;
pub use types::{PlaybackState, RepeatMode, UnderrunPolicy};
