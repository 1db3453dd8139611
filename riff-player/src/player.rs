//! Player facade
//!
//! The sole externally visible handle. Operations validate their inputs,
//! update facade-local mask state synchronously, post a command to the
//! engine task, and emit whatever listener notifications are defined at the
//! call site. Authoritative state flows back as `PlaybackInfo` updates that
//! the application pumps through [`Player::process_events`] /
//! [`Player::next_event`].
//!
//! The facade is deliberately `!Send`: all operations and listener callbacks
//! happen on the thread that built the player. Re-entrant calls from inside
//! listener callbacks are supported; their notifications are appended to the
//! in-flight drain, never interleaved.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use riff_common::time::{ms_to_us, us_to_ms};
use riff_common::{
    DiscontinuityReason, PlaybackParameters, PlaybackState, PlaybackSuppressionReason,
    RepeatMode, SeekParameters, TimelineChangeReason,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PlayerBuilder;
use crate::engine::{
    Engine, EngineCommand, EngineComponents, EngineEvent, HolderSpec, PlaybackInfoUpdate,
    SeekTarget,
};
use crate::error::{PlayerError, Result};
use crate::listener::{ListenerEvent, Notification, NotificationQueue, PlayerListener};
use crate::message::{MessageTarget, PlayerMessage};
use crate::playback_info::PlaybackInfo;
use crate::playlist::{concatenate_timeline, move_range, MediaSourceHolder};
use crate::shuffle::{playback_order, DefaultShuffleOrder, ShuffleOrder};
use crate::source::MediaSource;
use crate::timeline::{MediaPeriodId, Timeline};
use crate::track::{TrackGroupArray, TrackSelection, TrackSelectorResult};

/// Public player handle. Cheap to clone; all clones share one facade state
/// and may be captured by listeners for re-entrant calls.
#[derive(Clone)]
pub struct Player {
    inner: Rc<RefCell<PlayerInner>>,
    event_rx: Rc<RefCell<UnboundedReceiver<EngineEvent>>>,
}

struct PlayerInner {
    playback_info: PlaybackInfo,
    renderer_count: usize,

    holders: Vec<MediaSourceHolder>,
    /// Last real timeline observed per holder, fed by engine updates; used
    /// for masked-timeline synthesis.
    known_timelines: HashMap<Uuid, Timeline>,
    shuffle_order: Box<dyn ShuffleOrder>,

    play_when_ready: bool,
    suppression_reason: PlaybackSuppressionReason,
    repeat_mode: RepeatMode,
    shuffle_enabled: bool,
    playback_parameters: PlaybackParameters,
    seek_parameters: SeekParameters,
    foreground_mode: bool,

    // Masking state: getters serve these while operations are in flight.
    pending_operation_acks: u32,
    pending_set_playback_parameters_acks: u32,
    has_pending_seek: bool,
    masking_window_index: usize,
    masking_period_index: usize,
    masking_window_position_ms: u64,

    listeners: Vec<Rc<dyn PlayerListener>>,
    notifications: NotificationQueue,
    draining: bool,

    command_tx: UnboundedSender<EngineCommand>,
    /// Clone of the engine→app sender, used to self-post acks (e.g. a seek
    /// dropped because an ad is playing) so ordering with in-flight engine
    /// updates is preserved.
    event_tx: UnboundedSender<EngineEvent>,

    released: bool,
}

impl Player {
    /// Construct a player from its builder and spawn the engine task.
    /// Must be called within a tokio runtime.
    pub(crate) fn from_builder(builder: PlayerBuilder) -> Self {
        let renderer_count = builder.renderers.len();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let shuffle_order: Box<dyn ShuffleOrder> = Box::new(DefaultShuffleOrder::new(0));
        let engine = Engine::new(
            EngineComponents {
                renderers: builder.renderers,
                track_selector: builder.track_selector,
                load_control: builder.load_control,
                bandwidth_meter: builder.bandwidth_meter,
                clock: builder.clock,
                params: builder.params,
                use_lazy_preparation: builder.use_lazy_preparation,
            },
            shuffle_order.clone_box(),
            command_rx,
            command_tx.clone(),
            event_tx.clone(),
        );
        tokio::spawn(engine.run());
        info!(renderer_count, "player created");

        Self {
            inner: Rc::new(RefCell::new(PlayerInner {
                playback_info: PlaybackInfo::dummy(renderer_count),
                renderer_count,
                holders: Vec::new(),
                known_timelines: HashMap::new(),
                shuffle_order,
                play_when_ready: false,
                suppression_reason: PlaybackSuppressionReason::None,
                repeat_mode: RepeatMode::Off,
                shuffle_enabled: false,
                playback_parameters: PlaybackParameters::default(),
                seek_parameters: SeekParameters::default(),
                foreground_mode: false,
                pending_operation_acks: 0,
                pending_set_playback_parameters_acks: 0,
                has_pending_seek: false,
                masking_window_index: 0,
                masking_period_index: 0,
                masking_window_position_ms: 0,
                listeners: Vec::new(),
                notifications: NotificationQueue::new(),
                draining: false,
                command_tx,
                event_tx,
                released: false,
            })),
            event_rx: Rc::new(RefCell::new(event_rx)),
        }
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn add_listener(&self, listener: Rc<dyn PlayerListener>) {
        let mut inner = self.inner.borrow_mut();
        if !inner
            .listeners
            .iter()
            .any(|existing| Rc::ptr_eq(existing, &listener))
        {
            inner.listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Rc<dyn PlayerListener>) {
        let mut inner = self.inner.borrow_mut();
        inner
            .listeners
            .retain(|existing| !Rc::ptr_eq(existing, listener));
    }

    // ------------------------------------------------------------------
    // Transport operations
    // ------------------------------------------------------------------

    /// Transition out of idle and start loading. No-op unless the player is
    /// idle. Does not clear the playlist or the position.
    pub fn prepare(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if inner.playback_info.playback_state != PlaybackState::Idle {
            return Ok(());
        }
        let target_state = if inner.holders.is_empty() {
            // An empty playlist has nothing to buffer.
            PlaybackState::Ended
        } else {
            PlaybackState::Buffering
        };
        let info = inner.reset_playback_info(false, true, target_state);
        // Command first: operations issued from listener callbacks must
        // reach the engine after this prepare.
        inner.pending_operation_acks += 1;
        inner.send(EngineCommand::Prepare);
        inner.apply_playback_info(info, None, TimelineChangeReason::SourceUpdate, false);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    /// Replace the playlist, resetting the position to the first window's
    /// default position.
    pub fn set_media_items(&self, sources: Vec<Arc<dyn MediaSource>>) -> Result<()> {
        self.set_media_items_internal(sources, None, true)
    }

    /// Replace the playlist, optionally keeping the current position.
    pub fn set_media_items_with_reset(
        &self,
        sources: Vec<Arc<dyn MediaSource>>,
        reset_position: bool,
    ) -> Result<()> {
        self.set_media_items_internal(sources, None, reset_position)
    }

    /// Replace the playlist and seek to `(start_window_index,
    /// start_position_ms)` at the same time.
    pub fn set_media_items_with_position(
        &self,
        sources: Vec<Arc<dyn MediaSource>>,
        start_window_index: usize,
        start_position_ms: u64,
    ) -> Result<()> {
        self.set_media_items_internal(
            sources,
            Some((start_window_index, Some(start_position_ms))),
            true,
        )
    }

    /// Single-item convenience for [`Player::set_media_items`].
    pub fn set_media_item(&self, source: Arc<dyn MediaSource>) -> Result<()> {
        self.set_media_items(vec![source])
    }

    fn set_media_items_internal(
        &self,
        sources: Vec<Arc<dyn MediaSource>>,
        start: Option<(usize, Option<u64>)>,
        reset_position: bool,
    ) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if let Some((window, _)) = start {
            if window >= sources.len().max(1) {
                return Err(PlayerError::InvalidIndex {
                    index: window,
                    len: sources.len(),
                });
            }
        }
        // Capture the retained position before the playlist changes.
        let retained = (
            inner.current_window_index(),
            inner.current_position_ms(),
        );
        inner.pending_operation_acks += 1;

        let old_len = inner.holders.len();
        if old_len > 0 {
            inner.shuffle_order = inner.shuffle_order.clone_and_remove(0, old_len);
            let drained: Vec<MediaSourceHolder> = inner.holders.drain(..).collect();
            for holder in drained {
                inner.known_timelines.remove(&holder.uid);
            }
        }
        let holders: Vec<MediaSourceHolder> =
            sources.into_iter().map(MediaSourceHolder::new).collect();
        inner.shuffle_order = inner.shuffle_order.clone_and_insert(0, holders.len());
        inner.holders = holders;

        let engine_start = match (start, reset_position) {
            (Some((window, position_ms)), _) => {
                inner.masking_window_index = window;
                inner.masking_window_position_ms = position_ms.unwrap_or(0);
                Some(SeekTarget {
                    window_index: window,
                    position_ms,
                })
            }
            (None, true) => {
                inner.masking_window_index = 0;
                inner.masking_window_position_ms = 0;
                None
            }
            (None, false) => {
                let (window, position_ms) = retained;
                inner.masking_window_index = window.min(inner.holders.len().saturating_sub(1));
                inner.masking_window_position_ms = position_ms;
                Some(SeekTarget {
                    window_index: inner.masking_window_index,
                    position_ms: Some(position_ms),
                })
            }
        };
        let timeline = inner.mask_timeline();
        inner.refresh_masking_period_index(&timeline);

        let specs = inner.holder_specs();
        let shuffle = inner.shuffle_order.clone_box();
        inner.send(EngineCommand::SetMediaItems {
            holders: specs,
            start: engine_start,
            shuffle_order: shuffle,
        });
        inner.push_notification(vec![ListenerEvent::TimelineChanged {
            timeline,
            reason: TimelineChangeReason::PlaylistChanged,
        }]);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    /// Insert `sources` at `index` (0 ≤ index ≤ playlist length).
    pub fn add_media_items(
        &self,
        index: usize,
        sources: Vec<Arc<dyn MediaSource>>,
    ) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if index > inner.holders.len() {
            return Err(PlayerError::InvalidIndex {
                index,
                len: inner.holders.len(),
            });
        }
        inner.pending_operation_acks += 1;
        let count = sources.len();
        inner.shuffle_order = inner.shuffle_order.clone_and_insert(index, count);
        for (offset, source) in sources.into_iter().enumerate() {
            inner
                .holders
                .insert(index + offset, MediaSourceHolder::new(source));
        }
        if inner.masking_window_index >= index && count > 0 {
            inner.masking_window_index += count;
        }
        let timeline = inner.mask_timeline();
        inner.refresh_masking_period_index(&timeline);
        let specs = inner.holder_specs_range(index, index + count);
        let shuffle = inner.shuffle_order.clone_box();
        inner.send(EngineCommand::AddMediaItems {
            index,
            holders: specs,
            shuffle_order: shuffle,
        });
        inner.push_notification(vec![ListenerEvent::TimelineChanged {
            timeline,
            reason: TimelineChangeReason::PlaylistChanged,
        }]);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    /// Append convenience for [`Player::add_media_items`].
    pub fn add_media_item(&self, source: Arc<dyn MediaSource>) -> Result<()> {
        let index = self.inner.borrow().holders.len();
        self.add_media_items(index, vec![source])
    }

    /// Remove the half-open range `[from, to)`, returning the removed
    /// sources.
    pub fn remove_media_items(&self, from: usize, to: usize) -> Result<Vec<Arc<dyn MediaSource>>> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        let len = inner.holders.len();
        if to <= from || to > len {
            return Err(PlayerError::InvalidRange { from, to, len });
        }
        inner.pending_operation_acks += 1;
        inner.shuffle_order = inner.shuffle_order.clone_and_remove(from, to);
        let removed: Vec<MediaSourceHolder> = inner.holders.drain(from..to).collect();
        for holder in &removed {
            inner.known_timelines.remove(&holder.uid);
        }
        let count = to - from;
        if inner.masking_window_index >= to {
            inner.masking_window_index -= count;
        } else if inner.masking_window_index >= from {
            inner.masking_window_index = from.min(inner.holders.len().saturating_sub(1));
            inner.masking_window_position_ms = 0;
        }
        let timeline = inner.mask_timeline();
        inner.refresh_masking_period_index(&timeline);
        let shuffle = inner.shuffle_order.clone_box();
        inner.send(EngineCommand::RemoveMediaItems {
            from,
            to,
            shuffle_order: shuffle,
        });
        inner.push_notification(vec![ListenerEvent::TimelineChanged {
            timeline,
            reason: TimelineChangeReason::PlaylistChanged,
        }]);
        drop(inner);
        self.drain_notifications();
        Ok(removed.into_iter().map(|holder| holder.source).collect())
    }

    /// Remove one item, returning its source.
    pub fn remove_media_item(&self, index: usize) -> Result<Arc<dyn MediaSource>> {
        let mut removed = self.remove_media_items(index, index + 1)?;
        Ok(removed.remove(0))
    }

    /// Relocate the half-open range `[from, to)` to start at `new_from`
    /// (clamped to `len - (to - from)`).
    pub fn move_media_items(&self, from: usize, to: usize, new_from: usize) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        let len = inner.holders.len();
        if from > to || to > len {
            return Err(PlayerError::InvalidRange { from, to, len });
        }
        if from == to {
            return Ok(());
        }
        let new_from = new_from.min(len - (to - from));
        inner.pending_operation_acks += 1;
        move_range(&mut inner.holders, from, to, new_from);
        // The shuffle order keeps tracking the same holders under the moved
        // permutation.
        let mut indices: Vec<usize> = (0..len).collect();
        move_range(&mut indices, from, to, new_from);
        if let Some(position) = indices
            .iter()
            .position(|&i| i == inner.masking_window_index)
        {
            inner.masking_window_index = position;
        }
        let timeline = inner.mask_timeline();
        inner.refresh_masking_period_index(&timeline);
        let shuffle = inner.shuffle_order.clone_box();
        inner.send(EngineCommand::MoveMediaItems {
            from,
            to,
            new_from,
            shuffle_order: shuffle,
        });
        inner.push_notification(vec![ListenerEvent::TimelineChanged {
            timeline,
            reason: TimelineChangeReason::PlaylistChanged,
        }]);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    /// Single-item convenience for [`Player::move_media_items`].
    pub fn move_media_item(&self, current_index: usize, new_index: usize) -> Result<()> {
        self.move_media_items(current_index, current_index + 1, new_index)
    }

    /// Remove every playlist item. Afterwards getters read window 0,
    /// position 0 and the empty timeline.
    pub fn clear_media_items(&self) -> Result<()> {
        let len = self.inner.borrow().holders.len();
        if len == 0 {
            return Ok(());
        }
        self.remove_media_items(0, len).map(|_| ())
    }

    /// Seek to a window and position. Fails with `IllegalSeekPosition` when
    /// the window index is outside a non-empty timeline. While an ad plays
    /// the request is dropped silently (an ack is still posted to preserve
    /// discontinuity sequencing).
    pub fn seek_to(&self, window_index: usize, position_ms: u64) -> Result<()> {
        self.seek_internal(window_index, Some(position_ms))
    }

    /// Seek to a window's default position.
    pub fn seek_to_default_position(&self, window_index: usize) -> Result<()> {
        self.seek_internal(window_index, None)
    }

    /// Seek within the current window.
    pub fn seek_to_position(&self, position_ms: u64) -> Result<()> {
        let window_index = self.current_window_index();
        self.seek_internal(window_index, Some(position_ms))
    }

    fn seek_internal(&self, window_index: usize, position_ms: Option<u64>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        let timeline = inner.playback_info.timeline.clone();
        if !timeline.is_empty() && window_index >= timeline.window_count() {
            return Err(PlayerError::IllegalSeekPosition {
                window_index,
                window_count: timeline.window_count(),
            });
        }
        // The ad check must precede the ack bump: bumping first would flip
        // the getters into masking and hide the playing ad.
        if inner.is_playing_ad() {
            // Seeking during an ad is unsupported; the request is dropped,
            // but an ack still travels through the regular queue so
            // discontinuity sequencing is preserved.
            warn!("seek ignored because an ad is playing");
            inner.has_pending_seek = true;
            inner.pending_operation_acks += 1;
            let update = PlaybackInfoUpdate {
                info: inner.playback_info.clone(),
                operation_acks: 1,
                discontinuity: None,
                seek_processed: false,
                holder_timelines: inner
                    .known_timelines
                    .iter()
                    .map(|(uid, timeline)| (*uid, timeline.clone()))
                    .collect(),
            };
            let _ = inner.event_tx.send(EngineEvent::PlaybackInfo(update));
            return Ok(());
        }
        inner.has_pending_seek = true;
        inner.pending_operation_acks += 1;
        inner.masking_window_index = window_index;
        if timeline.is_empty() {
            inner.masking_window_position_ms = position_ms.unwrap_or(0);
            inner.masking_period_index = 0;
        } else {
            let window_position_us = position_ms
                .map(ms_to_us)
                .unwrap_or_else(|| timeline.window(window_index).default_position_us);
            inner.masking_window_position_ms = us_to_ms(window_position_us);
            inner.masking_period_index = timeline
                .resolve_window_position(window_index, window_position_us)
                .and_then(|(uid, _)| timeline.index_of_period(&uid))
                .unwrap_or(0);
        }
        inner.send(EngineCommand::Seek(SeekTarget {
            window_index,
            position_ms,
        }));
        inner.push_notification(vec![ListenerEvent::PositionDiscontinuity {
            reason: DiscontinuityReason::Seek,
        }]);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    /// Set whether playback progresses when ready.
    pub fn set_play_when_ready(&self, play_when_ready: bool) -> Result<()> {
        self.set_play_when_ready_with_suppression(play_when_ready, PlaybackSuppressionReason::None)
    }

    /// Set play-when-ready together with a suppression reason. The engine
    /// only sees the effective value (`play_when_ready` with no
    /// suppression).
    pub fn set_play_when_ready_with_suppression(
        &self,
        play_when_ready: bool,
        suppression_reason: PlaybackSuppressionReason,
    ) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        let old_is_playing = inner.is_playing();
        let old_effective = inner.play_when_ready
            && inner.suppression_reason == PlaybackSuppressionReason::None;
        let new_effective =
            play_when_ready && suppression_reason == PlaybackSuppressionReason::None;
        if old_effective != new_effective {
            inner.send(EngineCommand::SetPlayWhenReady(new_effective));
        }
        let play_when_ready_changed = inner.play_when_ready != play_when_ready;
        inner.play_when_ready = play_when_ready;
        inner.suppression_reason = suppression_reason;
        let is_playing = inner.is_playing();
        let mut events = Vec::new();
        if play_when_ready_changed {
            events.push(ListenerEvent::PlayerStateChanged {
                play_when_ready,
                state: inner.playback_info.playback_state,
            });
        }
        if old_is_playing != is_playing {
            events.push(ListenerEvent::IsPlayingChanged { is_playing });
        }
        if !events.is_empty() {
            inner.push_notification(events);
        }
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    pub fn set_repeat_mode(&self, repeat_mode: RepeatMode) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if inner.repeat_mode == repeat_mode {
            return Ok(());
        }
        inner.repeat_mode = repeat_mode;
        inner.send(EngineCommand::SetRepeatMode(repeat_mode));
        inner.push_notification(vec![ListenerEvent::RepeatModeChanged { repeat_mode }]);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    pub fn set_shuffle_mode_enabled(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if inner.shuffle_enabled == enabled {
            return Ok(());
        }
        inner.shuffle_enabled = enabled;
        inner.send(EngineCommand::SetShuffleModeEnabled(enabled));
        inner.push_notification(vec![ListenerEvent::ShuffleModeChanged { enabled }]);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    /// Replace the shuffle order. Its length must match the playlist.
    pub fn set_shuffle_order(&self, shuffle_order: Box<dyn ShuffleOrder>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if shuffle_order.len() != inner.holders.len() {
            return Err(PlayerError::ShuffleOrderLength {
                order_len: shuffle_order.len(),
                playlist_len: inner.holders.len(),
            });
        }
        inner.pending_operation_acks += 1;
        inner.shuffle_order = shuffle_order;
        let timeline = inner.mask_timeline();
        inner.refresh_masking_period_index(&timeline);
        let shuffle = inner.shuffle_order.clone_box();
        inner.send(EngineCommand::SetShuffleOrder {
            shuffle_order: shuffle,
        });
        inner.push_notification(vec![ListenerEvent::TimelineChanged {
            timeline,
            reason: TimelineChangeReason::PlaylistChanged,
        }]);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    pub fn set_playback_parameters(&self, parameters: PlaybackParameters) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if inner.playback_parameters == parameters {
            return Ok(());
        }
        inner.pending_set_playback_parameters_acks += 1;
        inner.playback_parameters = parameters;
        inner.send(EngineCommand::SetPlaybackParameters(parameters));
        inner.push_notification(vec![ListenerEvent::PlaybackParametersChanged { parameters }]);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    pub fn set_seek_parameters(&self, parameters: SeekParameters) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if inner.seek_parameters != parameters {
            inner.seek_parameters = parameters;
            inner.send(EngineCommand::SetSeekParameters(parameters));
        }
        Ok(())
    }

    pub fn set_foreground_mode(&self, foreground_mode: bool) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        if inner.foreground_mode != foreground_mode {
            inner.foreground_mode = foreground_mode;
            inner.send(EngineCommand::SetForegroundMode(foreground_mode));
        }
        Ok(())
    }

    /// Stop playback. With `reset` the playlist is cleared and the position
    /// reset; otherwise both are preserved for a later prepare.
    pub fn stop(&self, reset: bool) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.ensure_not_released()?;
        let info = inner.reset_playback_info(reset, reset, PlaybackState::Idle);
        inner.pending_operation_acks += 1;
        inner.send(EngineCommand::Stop { reset });
        inner.apply_playback_info(info, None, TimelineChangeReason::PlaylistChanged, false);
        drop(inner);
        self.drain_notifications();
        Ok(())
    }

    /// Release the player. The engine task ends; every later operation fails
    /// with [`PlayerError::Released`].
    pub fn release(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.released {
            return;
        }
        info!("player released");
        inner.send(EngineCommand::Release);
        inner.released = true;
        inner.pending_operation_acks = 0;
        inner.pending_set_playback_parameters_acks = 0;
        inner.has_pending_seek = false;
        inner.playback_info = inner.reset_playback_info(false, false, PlaybackState::Idle);
        inner.notifications.clear();
    }

    /// Create a message builder bound to the engine task.
    pub fn create_message(&self, target: Box<dyn MessageTarget>) -> PlayerMessage {
        let inner = self.inner.borrow();
        PlayerMessage::new(inner.command_tx.clone(), target)
    }

    // ------------------------------------------------------------------
    // Engine event pumping (the application-thread loop)
    // ------------------------------------------------------------------

    /// Apply every queued engine event without blocking. Returns the number
    /// of events applied.
    pub fn process_events(&self) -> usize {
        let mut applied = 0;
        loop {
            let event = match self.event_rx.try_borrow_mut() {
                Ok(mut rx) => rx.try_recv().ok(),
                // Re-entrant call from a listener callback; the outer pump
                // will pick the event up.
                Err(_) => None,
            };
            match event {
                Some(event) => {
                    self.apply_engine_event(event);
                    applied += 1;
                }
                None => return applied,
            }
        }
    }

    /// Await and apply one engine event. Returns false once the player has
    /// been released or the engine task has ended.
    pub async fn next_event(&self) -> bool {
        if self.inner.borrow().released {
            return false;
        }
        let event = {
            let mut rx = self.event_rx.borrow_mut();
            rx.recv().await
        };
        match event {
            Some(event) => {
                self.apply_engine_event(event);
                true
            }
            None => false,
        }
    }

    /// Pump engine events until no operation acks remain in flight and the
    /// queue is momentarily empty.
    pub async fn settle(&self) {
        loop {
            self.process_events();
            let pending = {
                let inner = self.inner.borrow();
                inner.pending_operation_acks > 0
                    || inner.pending_set_playback_parameters_acks > 0
            };
            if !pending {
                return;
            }
            if !self.next_event().await {
                return;
            }
        }
    }

    fn apply_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::PlaybackInfo(update) => self.handle_playback_info_update(update),
            EngineEvent::PlaybackParameters {
                parameters,
                operation_ack,
            } => self.handle_playback_parameters(parameters, operation_ack),
            EngineEvent::DeliverMessage(delivery) => {
                match delivery.target.lock() {
                    Ok(mut target) => {
                        if let Err(error) = target
                            .handle_message(delivery.message_type, delivery.payload.as_deref())
                        {
                            warn!(%error, "message target failed");
                        }
                        delivery.state.delivered.store(true, Ordering::Release);
                    }
                    Err(_) => warn!("message target mutex poisoned; delivery skipped"),
                }
            }
        }
    }

    fn handle_playback_info_update(&self, update: PlaybackInfoUpdate) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.known_timelines = update.holder_timelines.into_iter().collect();
            inner.pending_operation_acks = inner
                .pending_operation_acks
                .saturating_sub(update.operation_acks);
            if inner.pending_operation_acks > 0 {
                // Superseded intermediate update: count the acks, keep the
                // masked view.
                return;
            }
            if !inner.playback_info.timeline.is_empty() && update.info.timeline.is_empty() {
                // The timeline became empty; the masking fields take over.
                inner.masking_window_index = 0;
                inner.masking_period_index = 0;
                inner.masking_window_position_ms = 0;
            }
            let seek_processed =
                std::mem::take(&mut inner.has_pending_seek) || update.seek_processed;
            inner.apply_playback_info(
                update.info,
                update.discontinuity,
                TimelineChangeReason::SourceUpdate,
                seek_processed,
            );
        }
        self.drain_notifications();
    }

    fn handle_playback_parameters(&self, parameters: PlaybackParameters, operation_ack: bool) {
        {
            let mut inner = self.inner.borrow_mut();
            if operation_ack {
                inner.pending_set_playback_parameters_acks = inner
                    .pending_set_playback_parameters_acks
                    .saturating_sub(1);
            }
            if inner.pending_set_playback_parameters_acks == 0
                && inner.playback_parameters != parameters
            {
                inner.playback_parameters = parameters;
                inner.push_notification(vec![ListenerEvent::PlaybackParametersChanged {
                    parameters,
                }]);
            }
        }
        self.drain_notifications();
    }

    /// Drain the notification deque FIFO. Re-entrant state changes append to
    /// the same drain and run after the current pass.
    fn drain_notifications(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.draining {
                return;
            }
            inner.draining = true;
        }
        loop {
            let notification = {
                let mut inner = self.inner.borrow_mut();
                match inner.notifications.pop_front() {
                    Some(notification) => notification,
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            // Dispatch without holding the borrow so callbacks may re-enter.
            notification.dispatch();
        }
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.borrow().playback_info.playback_state
    }

    pub fn playback_error(&self) -> Option<Arc<PlayerError>> {
        self.inner.borrow().playback_info.playback_error.clone()
    }

    pub fn play_when_ready(&self) -> bool {
        self.inner.borrow().play_when_ready
    }

    pub fn playback_suppression_reason(&self) -> PlaybackSuppressionReason {
        self.inner.borrow().suppression_reason
    }

    /// Ready, playing and not suppressed.
    pub fn is_playing(&self) -> bool {
        self.inner.borrow().is_playing()
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.inner.borrow().repeat_mode
    }

    pub fn shuffle_mode_enabled(&self) -> bool {
        self.inner.borrow().shuffle_enabled
    }

    pub fn is_loading(&self) -> bool {
        self.inner.borrow().playback_info.is_loading
    }

    pub fn current_timeline(&self) -> Timeline {
        self.inner.borrow().playback_info.timeline.clone()
    }

    pub fn media_item_count(&self) -> usize {
        self.inner.borrow().holders.len()
    }

    pub fn current_window_index(&self) -> usize {
        self.inner.borrow().current_window_index()
    }

    pub fn current_period_index(&self) -> usize {
        self.inner.borrow().current_period_index()
    }

    pub fn current_position_ms(&self) -> u64 {
        self.inner.borrow().current_position_ms()
    }

    /// Duration of the current window (or the playing ad), if known.
    pub fn duration_ms(&self) -> Option<u64> {
        self.inner.borrow().duration_ms()
    }

    pub fn buffered_position_ms(&self) -> u64 {
        self.inner.borrow().buffered_position_ms()
    }

    pub fn total_buffered_duration_ms(&self) -> u64 {
        us_to_ms(self.inner.borrow().playback_info.total_buffered_duration_us)
    }

    pub fn is_playing_ad(&self) -> bool {
        self.inner.borrow().is_playing_ad()
    }

    pub fn current_ad_group_index(&self) -> Option<usize> {
        let inner = self.inner.borrow();
        if inner.is_playing_ad() {
            inner.playback_info.period_id.ad_group_index
        } else {
            None
        }
    }

    pub fn current_ad_index_in_ad_group(&self) -> Option<usize> {
        let inner = self.inner.borrow();
        if inner.is_playing_ad() {
            inner.playback_info.period_id.ad_index_in_ad_group
        } else {
            None
        }
    }

    /// Content position (excluding any playing ad).
    pub fn content_position_ms(&self) -> u64 {
        self.inner.borrow().content_position_ms()
    }

    pub fn content_buffered_position_ms(&self) -> u64 {
        self.inner.borrow().content_buffered_position_ms()
    }

    pub fn current_track_groups(&self) -> TrackGroupArray {
        self.inner.borrow().playback_info.track_groups.clone()
    }

    pub fn current_track_selections(&self) -> Vec<Option<TrackSelection>> {
        self.inner
            .borrow()
            .playback_info
            .track_selector_result
            .selections
            .clone()
    }

    pub fn playback_parameters(&self) -> PlaybackParameters {
        self.inner.borrow().playback_parameters
    }

    pub fn seek_parameters(&self) -> SeekParameters {
        self.inner.borrow().seek_parameters
    }
}

impl PlayerInner {
    fn ensure_not_released(&self) -> Result<()> {
        if self.released {
            Err(PlayerError::Released)
        } else {
            Ok(())
        }
    }

    fn send(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            debug!("engine command dropped: engine task ended");
        }
    }

    fn holder_specs(&self) -> Vec<HolderSpec> {
        self.holders
            .iter()
            .map(|holder| HolderSpec {
                uid: holder.uid,
                source: Arc::clone(&holder.source),
            })
            .collect()
    }

    fn holder_specs_range(&self, from: usize, to: usize) -> Vec<HolderSpec> {
        self.holders[from..to]
            .iter()
            .map(|holder| HolderSpec {
                uid: holder.uid,
                source: Arc::clone(&holder.source),
            })
            .collect()
    }

    /// Synthesize the masked timeline from the holder list and the last
    /// known real timelines, and install it on the playback info so getters
    /// stay consistent with the emitted timeline event.
    fn mask_timeline(&mut self) -> Timeline {
        let timeline = {
            let children: Vec<(Uuid, Option<&Timeline>)> = self
                .holders
                .iter()
                .map(|holder| (holder.uid, self.known_timelines.get(&holder.uid)))
                .collect();
            let order = playback_order(self.shuffle_order.as_ref());
            concatenate_timeline(&children, &order).0
        };
        self.playback_info = self.playback_info.copy_with_timeline(timeline.clone());
        timeline
    }

    fn refresh_masking_period_index(&mut self, timeline: &Timeline) {
        if timeline.is_empty() {
            self.masking_period_index = 0;
            return;
        }
        let window = self.masking_window_index.min(timeline.window_count() - 1);
        self.masking_window_index = window;
        self.masking_period_index = timeline.window(window).first_period_index;
    }

    /// Build the locally predicted `PlaybackInfo` used by prepare/stop/
    /// release before the engine acks.
    fn reset_playback_info(
        &mut self,
        clear_playlist: bool,
        reset_error: bool,
        playback_state: PlaybackState,
    ) -> PlaybackInfo {
        if clear_playlist {
            let len = self.holders.len();
            if len > 0 {
                self.shuffle_order = self.shuffle_order.clone_and_remove(0, len);
            }
            for holder in self.holders.drain(..) {
                self.known_timelines.remove(&holder.uid);
            }
            self.masking_window_index = 0;
            self.masking_period_index = 0;
            self.masking_window_position_ms = 0;
        } else {
            self.masking_window_index = self.current_window_index();
            self.masking_period_index = self.current_period_index();
            self.masking_window_position_ms = self.current_position_ms();
        }
        let period_id = if clear_playlist {
            MediaPeriodId::new(Uuid::nil(), 0)
        } else {
            self.playback_info.period_id.clone()
        };
        let position_us = if clear_playlist {
            0
        } else {
            self.playback_info.position_us
        };
        PlaybackInfo {
            timeline: if clear_playlist {
                Timeline::empty()
            } else {
                self.playback_info.timeline.clone()
            },
            period_id: period_id.clone(),
            position_us,
            content_position_us: if clear_playlist {
                None
            } else {
                self.playback_info.content_position_us
            },
            playback_state,
            playback_error: if reset_error {
                None
            } else {
                self.playback_info.playback_error.clone()
            },
            is_loading: false,
            track_groups: if clear_playlist {
                TrackGroupArray::EMPTY
            } else {
                self.playback_info.track_groups.clone()
            },
            track_selector_result: if clear_playlist {
                TrackSelectorResult::empty(self.renderer_count)
            } else {
                self.playback_info.track_selector_result.clone()
            },
            loading_period_id: period_id,
            buffered_position_us: position_us,
            total_buffered_duration_us: 0,
        }
    }

    /// Install a new snapshot and queue the listener notification batch in
    /// the fixed sub-event order. Sub-events are omitted when unchanged.
    fn apply_playback_info(
        &mut self,
        info: PlaybackInfo,
        discontinuity: Option<DiscontinuityReason>,
        timeline_reason: TimelineChangeReason,
        seek_processed: bool,
    ) {
        let was_playing = self.is_playing();
        let previous = std::mem::replace(&mut self.playback_info, info);
        let is_playing = self.is_playing();

        let mut events = Vec::new();
        if !previous
            .timeline
            .content_eq(&self.playback_info.timeline)
        {
            events.push(ListenerEvent::TimelineChanged {
                timeline: self.playback_info.timeline.clone(),
                reason: timeline_reason,
            });
        }
        if let Some(reason) = discontinuity {
            events.push(ListenerEvent::PositionDiscontinuity { reason });
        }
        let error_changed = match (&previous.playback_error, &self.playback_info.playback_error)
        {
            (None, Some(_)) => true,
            (Some(old), Some(new)) => !Arc::ptr_eq(old, new),
            _ => false,
        };
        if error_changed {
            if let Some(error) = &self.playback_info.playback_error {
                events.push(ListenerEvent::PlayerError {
                    error: Arc::clone(error),
                });
            }
        }
        if previous.track_selector_result != self.playback_info.track_selector_result {
            events.push(ListenerEvent::TracksChanged {
                track_groups: self.playback_info.track_groups.clone(),
                selections: self.playback_info.track_selector_result.selections.clone(),
            });
        }
        if previous.is_loading != self.playback_info.is_loading {
            events.push(ListenerEvent::LoadingChanged {
                is_loading: self.playback_info.is_loading,
            });
        }
        if previous.playback_state != self.playback_info.playback_state {
            events.push(ListenerEvent::PlayerStateChanged {
                play_when_ready: self.play_when_ready,
                state: self.playback_info.playback_state,
            });
        }
        if was_playing != is_playing {
            events.push(ListenerEvent::IsPlayingChanged { is_playing });
        }
        if seek_processed {
            events.push(ListenerEvent::SeekProcessed);
        }
        if !events.is_empty() {
            self.push_notification(events);
        }
    }

    fn push_notification(&mut self, events: Vec<ListenerEvent>) {
        let snapshot = self.listeners.clone();
        self.notifications
            .push_back(Notification::new(snapshot, events));
    }

    fn is_playing(&self) -> bool {
        self.playback_info.playback_state == PlaybackState::Ready
            && self.play_when_ready
            && self.suppression_reason == PlaybackSuppressionReason::None
    }

    fn is_playing_ad(&self) -> bool {
        !self.should_mask_position() && self.playback_info.period_id.is_ad()
    }

    fn should_mask_position(&self) -> bool {
        self.playback_info.timeline.is_empty() || self.pending_operation_acks > 0
    }

    fn current_window_index(&self) -> usize {
        if self.should_mask_position() {
            self.masking_window_index
        } else {
            self.playback_info
                .timeline
                .window_index_of_period(&self.playback_info.period_id.period_uid)
                .unwrap_or(0)
        }
    }

    fn current_period_index(&self) -> usize {
        if self.should_mask_position() {
            self.masking_period_index
        } else {
            self.playback_info
                .timeline
                .index_of_period(&self.playback_info.period_id.period_uid)
                .unwrap_or(0)
        }
    }

    fn current_position_ms(&self) -> u64 {
        if self.should_mask_position() {
            self.masking_window_position_ms
        } else if self.playback_info.period_id.is_ad() {
            us_to_ms(self.playback_info.position_us)
        } else {
            self.period_position_to_window_ms(self.playback_info.position_us)
        }
    }

    fn period_position_to_window_ms(&self, period_position_us: u64) -> u64 {
        self.playback_info
            .timeline
            .window_position_us(&self.playback_info.period_id.period_uid, period_position_us)
            .map(us_to_ms)
            .unwrap_or_else(|| us_to_ms(period_position_us))
    }

    fn duration_ms(&self) -> Option<u64> {
        let info = &self.playback_info;
        if self.is_playing_ad() {
            let period = info.timeline.period_by_uid(&info.period_id.period_uid)?;
            let ad_state = period.ad_playback_state.as_ref()?;
            return ad_state
                .ad_duration_us(
                    info.period_id.ad_group_index?,
                    info.period_id.ad_index_in_ad_group?,
                )
                .map(us_to_ms);
        }
        if info.timeline.is_empty() {
            return None;
        }
        let window = self.current_window_index();
        if window >= info.timeline.window_count() {
            return None;
        }
        info.timeline.window(window).duration_us.map(us_to_ms)
    }

    fn buffered_position_ms(&self) -> u64 {
        if self.is_playing_ad() {
            let info = &self.playback_info;
            if info.loading_period_id == info.period_id {
                return us_to_ms(info.buffered_position_us);
            }
            return self.duration_ms().unwrap_or(0);
        }
        self.content_buffered_position_ms()
    }

    fn content_position_ms(&self) -> u64 {
        if self.is_playing_ad() {
            let info = &self.playback_info;
            match info.content_position_us {
                Some(content_position_us) => info
                    .timeline
                    .window_position_us(&info.period_id.period_uid, content_position_us)
                    .map(us_to_ms)
                    .unwrap_or_else(|| us_to_ms(content_position_us)),
                None => {
                    let window = self.current_window_index();
                    us_to_ms(info.timeline.window(window).default_position_us)
                }
            }
        } else {
            self.current_position_ms()
        }
    }

    fn content_buffered_position_ms(&self) -> u64 {
        if self.should_mask_position() {
            return self.masking_window_position_ms;
        }
        let info = &self.playback_info;
        if info.loading_period_id.window_sequence_number
            != info.period_id.window_sequence_number
        {
            // Loading has already moved to a later window; everything in the
            // current window is buffered.
            let window = self.current_window_index();
            return info
                .timeline
                .window(window)
                .duration_us
                .map(us_to_ms)
                .unwrap_or(0);
        }
        let mut content_buffered_us = info.buffered_position_us;
        if let Some(ad_group_index) = info.loading_period_id.ad_group_index {
            // Loading an ad: content is buffered up to the ad break.
            if let Some(period) = info
                .timeline
                .period_by_uid(&info.loading_period_id.period_uid)
            {
                if let Some(ad_state) = &period.ad_playback_state {
                    content_buffered_us = match ad_state.break_time_us(ad_group_index).flatten()
                    {
                        Some(time_us) => time_us,
                        None => period.duration_us.unwrap_or(content_buffered_us),
                    };
                }
            }
        }
        info.timeline
            .window_position_us(&info.loading_period_id.period_uid, content_buffered_us)
            .map(us_to_ms)
            .unwrap_or_else(|| us_to_ms(content_buffered_us))
    }
}
