//! Playback state vocabulary shared between the player facade and hosts

use serde::{Deserialize, Serialize};

/// Coarse playback state of the player.
///
/// Transitions are driven by the internal playback engine; the facade only
/// reflects the latest acknowledged snapshot (or the masked view while
/// operations are in flight).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Player has no prepared content, or was stopped or failed.
    Idle,
    /// Content is prepared but the current position cannot yet be rendered.
    Buffering,
    /// The current position can be rendered immediately.
    Ready,
    /// All content has been played to the end.
    Ended,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Ended => write!(f, "ended"),
        }
    }
}

/// Repeat behavior when the end of a window (or of the playlist) is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Playback stops at the end of the playlist.
    Off,
    /// The current window repeats indefinitely.
    One,
    /// The playlist wraps around from its last window to its first.
    All,
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Off => write!(f, "off"),
            RepeatMode::One => write!(f, "one"),
            RepeatMode::All => write!(f, "all"),
        }
    }
}

/// Reason why playback is suppressed even though `play_when_ready` is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackSuppressionReason {
    /// Playback is not suppressed.
    None,
    /// Audio focus was lost transiently; playback resumes when it returns.
    TransientAudioFocusLoss,
}

/// Reason carried by a timeline-changed notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimelineChangeReason {
    /// The playlist was mutated on the application side; the timeline is the
    /// synchronously computed masked timeline.
    PlaylistChanged,
    /// A media source delivered fresh timeline information and the engine's
    /// authoritative timeline changed.
    SourceUpdate,
}

/// Reason carried by a position-discontinuity notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuityReason {
    /// Natural advance from one period to the next.
    PeriodTransition,
    /// An explicit seek requested through the facade.
    Seek,
    /// The engine adjusted a seek position (e.g. to a sync point).
    SeekAdjustment,
    /// Playback jumped into or out of an inserted ad.
    AdInsertion,
    /// An internal correction, not attributable to any of the above.
    Internal,
}
