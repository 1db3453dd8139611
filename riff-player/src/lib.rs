//! # riff-player
//!
//! The control-plane core of a streaming media player: the playback-state
//! machine, the playlist of media sources, the command/ack protocol between
//! the public facade and the internal playback task, and the timeline and
//! position masking that keeps the externally observable state linear under
//! concurrent mutation.
//!
//! The crate makes few assumptions about the media itself. Loading and
//! rendering are delegated to injected capabilities (`MediaSource`,
//! `Renderer`, `TrackSelector`, `LoadControl`), driven on the internal task.
//!
//! ## Threading model
//!
//! A player must be accessed from the single thread that built it; listener
//! callbacks run on that thread as well. Operations post typed commands to
//! the internal task and return immediately; authoritative `PlaybackInfo`
//! updates flow back over a second queue that the application pumps through
//! [`Player::process_events`] / [`Player::next_event`]. Positional getters
//! serve a masked, forward-consistent view while operations are in flight.

pub mod config;
pub mod error;
pub mod listener;
pub mod message;
pub mod playback_info;
pub mod renderer;
pub mod shuffle;
pub mod source;
pub mod timeline;
pub mod track;

mod engine;
mod player;
mod playlist;

pub use config::PlayerBuilder;
pub use error::{PlayerError, Result};
pub use listener::PlayerListener;
pub use message::{
    MessageHandle, MessagePayload, MessageTarget, MessageType, PlayerMessage, MSG_CUSTOM_BASE,
    MSG_SET_SURFACE,
};
pub use playback_info::PlaybackInfo;
pub use player::Player;
pub use riff_common::{
    DiscontinuityReason, EngineParams, PlaybackParameters, PlaybackState,
    PlaybackSuppressionReason, RepeatMode, SeekParameters, TimelineChangeReason,
};
pub use shuffle::{DefaultShuffleOrder, ShuffleOrder, UnshuffledOrder};
pub use timeline::{AdBreak, AdPlaybackState, MediaPeriodId, Period, Timeline, Window};
