//! # Riff Common Library
//!
//! Shared vocabulary for the riff playback engine:
//! - Playback state and repeat-mode enums
//! - Listener change-reason enums
//! - Playback, seek and engine tuning parameters
//! - Time unit conversions
//! - Common error type

pub mod error;
pub mod params;
pub mod state;
pub mod time;

pub use error::{Error, Result};
pub use params::{EngineParams, PlaybackParameters, SeekParameters};
pub use state::{
    DiscontinuityReason, PlaybackState, PlaybackSuppressionReason, RepeatMode,
    TimelineChangeReason,
};
