//! Error types for riff-player
//!
//! Defines the player error taxonomy using thiserror. Programmer errors (bad
//! indices, out-of-range seeks) surface synchronously from facade methods.
//! Runtime media errors travel through `PlaybackInfo` so that listener
//! ordering is preserved.

use thiserror::Error;

/// Main error type for the player
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Seek to a window index outside the current timeline
    #[error("illegal seek position: window {window_index} not in [0, {window_count})")]
    IllegalSeekPosition {
        window_index: usize,
        window_count: usize,
    },

    /// Playlist index argument outside the valid range
    #[error("invalid playlist index: {index} not in [0, {len}]")]
    InvalidIndex { index: usize, len: usize },

    /// Playlist range argument with `to <= from` or `to > len`
    #[error("invalid playlist range: [{from}, {to}) with length {len}")]
    InvalidRange { from: usize, to: usize, len: usize },

    /// Shuffle order whose length does not match the playlist
    #[error("shuffle order length {order_len} does not match playlist length {playlist_len}")]
    ShuffleOrderLength {
        order_len: usize,
        playlist_len: usize,
    },

    /// Error raised by a media source (network, parse, I/O)
    #[error("source error: {0}")]
    Source(String),

    /// Error raised by a renderer (init or runtime failure)
    #[error("renderer error: {0}")]
    Renderer(String),

    /// Track selection failure
    #[error("track selection error: {0}")]
    TrackSelection(String),

    /// Invariant violation inside the internal playback loop; fatal
    #[error("unexpected state: {0}")]
    UnexpectedState(String),

    /// Operation on a player that has been released
    #[error("player has been released")]
    Released,
}

impl PlayerError {
    /// Whether this error originated inside a media source.
    pub fn is_source_error(&self) -> bool {
        matches!(self, PlayerError::Source(_))
    }

    /// Whether this error originated inside a renderer.
    pub fn is_renderer_error(&self) -> bool {
        matches!(self, PlayerError::Renderer(_))
    }
}

/// Convenience Result type using PlayerError
pub type Result<T> = std::result::Result<T, PlayerError>;
