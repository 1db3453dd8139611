//! Listener surface and re-entrancy-safe dispatch
//!
//! Listeners are held in a copy-on-write collection: a notification snapshots
//! the current set, so concurrent add/remove never affects an in-flight pass.
//! Notifications queue into a deque drained FIFO; a state change triggered
//! from inside a callback appends to the deque and is dispatched after the
//! current pass, never interleaved with it.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use riff_common::{
    DiscontinuityReason, PlaybackParameters, PlaybackState, RepeatMode, TimelineChangeReason,
};

use crate::error::PlayerError;
use crate::timeline::Timeline;
use crate::track::{TrackGroupArray, TrackSelection};

/// Receiver of player events. All methods have empty default implementations;
/// implement only what you need.
///
/// Callbacks run on the application thread. Calling back into the player from
/// a callback is allowed; the resulting notifications are dispatched after
/// the current pass completes.
pub trait PlayerListener {
    fn on_timeline_changed(&self, _timeline: &Timeline, _reason: TimelineChangeReason) {}

    fn on_position_discontinuity(&self, _reason: DiscontinuityReason) {}

    fn on_player_error(&self, _error: &PlayerError) {}

    fn on_tracks_changed(
        &self,
        _track_groups: &TrackGroupArray,
        _selections: &[Option<TrackSelection>],
    ) {
    }

    fn on_loading_changed(&self, _is_loading: bool) {}

    fn on_player_state_changed(&self, _play_when_ready: bool, _state: PlaybackState) {}

    fn on_is_playing_changed(&self, _is_playing: bool) {}

    fn on_seek_processed(&self) {}

    fn on_repeat_mode_changed(&self, _repeat_mode: RepeatMode) {}

    fn on_shuffle_mode_enabled_changed(&self, _enabled: bool) {}

    fn on_playback_parameters_changed(&self, _parameters: &PlaybackParameters) {}
}

/// One listener-visible event.
#[derive(Clone)]
pub(crate) enum ListenerEvent {
    TimelineChanged {
        timeline: Timeline,
        reason: TimelineChangeReason,
    },
    PositionDiscontinuity {
        reason: DiscontinuityReason,
    },
    PlayerError {
        error: Arc<PlayerError>,
    },
    TracksChanged {
        track_groups: TrackGroupArray,
        selections: Vec<Option<TrackSelection>>,
    },
    LoadingChanged {
        is_loading: bool,
    },
    PlayerStateChanged {
        play_when_ready: bool,
        state: PlaybackState,
    },
    IsPlayingChanged {
        is_playing: bool,
    },
    SeekProcessed,
    RepeatModeChanged {
        repeat_mode: RepeatMode,
    },
    ShuffleModeChanged {
        enabled: bool,
    },
    PlaybackParametersChanged {
        parameters: PlaybackParameters,
    },
}

/// A queued notification: an ordered batch of events delivered to a snapshot
/// of the listener set. Batching keeps the sub-events of one update together;
/// two updates' sub-events never interleave.
pub(crate) struct Notification {
    listeners: Vec<Rc<dyn PlayerListener>>,
    events: Vec<ListenerEvent>,
}

impl Notification {
    pub fn new(listeners: Vec<Rc<dyn PlayerListener>>, events: Vec<ListenerEvent>) -> Self {
        Self { listeners, events }
    }

    /// Deliver every event to every listener. Each sub-event reaches all
    /// listeners before the next sub-event fires, so all listeners observe
    /// the same order.
    pub fn dispatch(&self) {
        for event in &self.events {
            for listener in &self.listeners {
                dispatch_one(listener.as_ref(), event);
            }
        }
    }
}

fn dispatch_one(listener: &dyn PlayerListener, event: &ListenerEvent) {
    match event {
        ListenerEvent::TimelineChanged { timeline, reason } => {
            listener.on_timeline_changed(timeline, *reason);
        }
        ListenerEvent::PositionDiscontinuity { reason } => {
            listener.on_position_discontinuity(*reason);
        }
        ListenerEvent::PlayerError { error } => {
            listener.on_player_error(error);
        }
        ListenerEvent::TracksChanged {
            track_groups,
            selections,
        } => {
            listener.on_tracks_changed(track_groups, selections);
        }
        ListenerEvent::LoadingChanged { is_loading } => {
            listener.on_loading_changed(*is_loading);
        }
        ListenerEvent::PlayerStateChanged {
            play_when_ready,
            state,
        } => {
            listener.on_player_state_changed(*play_when_ready, *state);
        }
        ListenerEvent::IsPlayingChanged { is_playing } => {
            listener.on_is_playing_changed(*is_playing);
        }
        ListenerEvent::SeekProcessed => listener.on_seek_processed(),
        ListenerEvent::RepeatModeChanged { repeat_mode } => {
            listener.on_repeat_mode_changed(*repeat_mode);
        }
        ListenerEvent::ShuffleModeChanged { enabled } => {
            listener.on_shuffle_mode_enabled_changed(*enabled);
        }
        ListenerEvent::PlaybackParametersChanged { parameters } => {
            listener.on_playback_parameters_changed(parameters);
        }
    }
}

/// FIFO deque of pending notifications.
pub(crate) type NotificationQueue = VecDeque<Notification>;
