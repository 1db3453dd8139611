//! Playback tuning parameters
//!
//! Plain-data parameter structs shared between the facade and the engine.
//! All of them are serde-derived so hosts can persist or expose them.

use serde::{Deserialize, Serialize};

/// Playback speed and pitch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlaybackParameters {
    /// Playback speed factor. Valid range: (0.0, 8.0]. Default: 1.0.
    pub speed: f32,
    /// Pitch factor. Valid range: (0.0, 8.0]. Default: 1.0.
    pub pitch: f32,
}

impl Default for PlaybackParameters {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
        }
    }
}

impl PlaybackParameters {
    pub fn with_speed(speed: f32) -> Self {
        Self {
            speed,
            ..Self::default()
        }
    }
}

/// Seek accuracy tolerances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SeekParameters {
    /// How far before the requested position the engine may land.
    pub tolerance_before_us: u64,
    /// How far after the requested position the engine may land.
    pub tolerance_after_us: u64,
}

impl SeekParameters {
    /// Land exactly on the requested position.
    pub const EXACT: SeekParameters = SeekParameters {
        tolerance_before_us: 0,
        tolerance_after_us: 0,
    };

    /// Allow snapping to the closest sync point.
    pub const CLOSEST_SYNC: SeekParameters = SeekParameters {
        tolerance_before_us: u64::MAX,
        tolerance_after_us: u64::MAX,
    };
}

/// Engine loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    /// Milliseconds between work-loop passes while playback can progress.
    ///
    /// Valid range: [1, 1000]. Default: 10 ms.
    pub work_interval_ms: u64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            work_interval_ms: 10,
        }
    }
}
