//! Internal playback dispatcher
//!
//! The engine runs as a dedicated task owning the renderers, track selector,
//! load control and the engine-side playlist copy. It consumes commands from
//! the facade in FIFO order, advances playback, and posts `PlaybackInfo`
//! updates (with operation-ack counts) back to the application thread.

mod core;
mod messages;
mod playback;

pub(crate) use self::core::{Engine, EngineComponents};

use std::sync::Arc;

use riff_common::{DiscontinuityReason, PlaybackParameters, RepeatMode, SeekParameters};
use uuid::Uuid;

use crate::message::{
    MessagePayload, MessageSpec, MessageState, MessageType, SharedMessageTarget,
};
use crate::playback_info::PlaybackInfo;
use crate::shuffle::ShuffleOrder;
use crate::source::MediaSource;
use crate::timeline::Timeline;

/// One playlist entry shipped from the facade to the engine.
pub(crate) struct HolderSpec {
    pub uid: Uuid,
    pub source: Arc<dyn MediaSource>,
}

/// A seek destination. `position_ms == None` requests the window's default
/// position.
#[derive(Debug, Clone)]
pub(crate) struct SeekTarget {
    pub window_index: usize,
    pub position_ms: Option<u64>,
}

/// Commands consumed by the engine, in submission order.
pub(crate) enum EngineCommand {
    Prepare,
    SetMediaItems {
        holders: Vec<HolderSpec>,
        start: Option<SeekTarget>,
        shuffle_order: Box<dyn ShuffleOrder>,
    },
    AddMediaItems {
        index: usize,
        holders: Vec<HolderSpec>,
        shuffle_order: Box<dyn ShuffleOrder>,
    },
    RemoveMediaItems {
        from: usize,
        to: usize,
        shuffle_order: Box<dyn ShuffleOrder>,
    },
    MoveMediaItems {
        from: usize,
        to: usize,
        new_from: usize,
        shuffle_order: Box<dyn ShuffleOrder>,
    },
    SetShuffleOrder {
        shuffle_order: Box<dyn ShuffleOrder>,
    },
    Seek(SeekTarget),
    SetPlayWhenReady(bool),
    SetRepeatMode(RepeatMode),
    SetShuffleModeEnabled(bool),
    SetPlaybackParameters(PlaybackParameters),
    SetSeekParameters(SeekParameters),
    SetForegroundMode(bool),
    Stop {
        reset: bool,
    },
    Release,
    SendMessage(MessageSpec),
    /// Source-info refresh routed back through the command queue by the
    /// callback handed to `MediaSource::prepare`.
    SourceInfoRefreshed {
        holder: Uuid,
        timeline: Timeline,
    },
}

/// One `PlaybackInfo` message posted back to the application thread.
pub(crate) struct PlaybackInfoUpdate {
    pub info: PlaybackInfo,
    /// Number of facade operations this update acknowledges.
    pub operation_acks: u32,
    pub discontinuity: Option<DiscontinuityReason>,
    /// Set when this update acknowledges an applied seek.
    pub seek_processed: bool,
    /// Last known real timeline per playlist entry, for facade masking.
    pub holder_timelines: Vec<(Uuid, Timeline)>,
}

/// A message whose delivery was requested on the application thread.
pub(crate) struct AppThreadDelivery {
    pub target: SharedMessageTarget,
    pub message_type: MessageType,
    pub payload: Option<Arc<MessagePayload>>,
    pub state: Arc<MessageState>,
}

/// Events flowing engine → application thread.
pub(crate) enum EngineEvent {
    PlaybackInfo(PlaybackInfoUpdate),
    PlaybackParameters {
        parameters: PlaybackParameters,
        operation_ack: bool,
    },
    DeliverMessage(AppThreadDelivery),
}
