//! Engine state and command handling
//!
//! **Responsibilities:**
//! - Engine struct definition and construction
//! - Run loop: FIFO command consumption plus the periodic work tick
//! - Command handlers for playlist, transport and lifecycle operations
//!
//! Work-loop progress itself (state machine, seeks, period transitions)
//! lives in `playback.rs`; positioned-message delivery in `messages.rs`.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use riff_common::{
    EngineParams, PlaybackParameters, PlaybackState, RepeatMode, SeekParameters,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EngineCommand, EngineEvent, HolderSpec, SeekTarget};
use super::messages::PendingMessage;
use crate::error::PlayerError;
use crate::playlist::move_range;
use crate::renderer::{BandwidthMeter, Clock, LoadControl, Renderer, TrackSelector};
use crate::shuffle::ShuffleOrder;
use crate::source::{Allocator, MediaPeriod, MediaSource};
use crate::timeline::{MediaPeriodId, Timeline};
use crate::track::{TrackGroupArray, TrackSelectorResult};

/// Engine-side playlist entry.
pub(super) struct EngineHolder {
    pub uid: Uuid,
    pub source: Arc<dyn MediaSource>,
    /// Whether `prepare` has been called on the source.
    pub prepare_sent: bool,
    /// Last timeline the source delivered.
    pub timeline: Option<Timeline>,
}

/// The period currently being played, with its created media period.
pub(super) struct ActivePeriod {
    pub id: MediaPeriodId,
    pub period: Box<dyn MediaPeriod>,
    pub holder: Uuid,
}

/// Injected collaborators handed to the engine at construction.
pub(crate) struct EngineComponents {
    pub renderers: Vec<Box<dyn Renderer>>,
    pub track_selector: Box<dyn TrackSelector>,
    pub load_control: Box<dyn LoadControl>,
    pub bandwidth_meter: Arc<dyn BandwidthMeter>,
    pub clock: Arc<dyn Clock>,
    pub params: EngineParams,
    pub use_lazy_preparation: bool,
}

/// Internal playback dispatcher. Runs as a dedicated task; owns the
/// renderers, sources and its own playlist copy.
pub(crate) struct Engine {
    pub(super) command_rx: UnboundedReceiver<EngineCommand>,
    /// Clone handed to source-info callbacks so refreshes re-enter the queue.
    pub(super) command_tx: UnboundedSender<EngineCommand>,
    pub(super) event_tx: UnboundedSender<EngineEvent>,

    pub(super) renderers: Vec<Box<dyn Renderer>>,
    pub(super) renderer_enabled: Vec<bool>,
    pub(super) renderers_started: bool,
    pub(super) track_selector: Box<dyn TrackSelector>,
    pub(super) load_control: Box<dyn LoadControl>,
    #[allow(dead_code)]
    pub(super) bandwidth_meter: Arc<dyn BandwidthMeter>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) allocator: Allocator,
    pub(super) params: EngineParams,
    pub(super) use_lazy_preparation: bool,

    pub(super) holders: Vec<EngineHolder>,
    /// Window range each holder occupies in the concatenated timeline.
    pub(super) holder_ranges: Vec<(Uuid, Range<usize>)>,
    pub(super) shuffle_order: Box<dyn ShuffleOrder>,

    pub(super) prepared: bool,
    pub(super) play_when_ready: bool,
    pub(super) repeat_mode: RepeatMode,
    pub(super) shuffle_enabled: bool,
    pub(super) playback_parameters: PlaybackParameters,
    #[allow(dead_code)]
    pub(super) seek_parameters: SeekParameters,
    #[allow(dead_code)]
    pub(super) foreground_mode: bool,

    pub(super) state: PlaybackState,
    pub(super) error: Option<Arc<PlayerError>>,
    pub(super) is_loading: bool,
    pub(super) timeline: Timeline,

    /// Created media period being played, if any.
    pub(super) current: Option<ActivePeriod>,
    /// Uid of the current period (placeholder or real) even before a media
    /// period has been created.
    pub(super) period_uid: Option<Uuid>,
    pub(super) current_window: usize,
    pub(super) period_position_us: u64,
    /// Content position the period resumes at once the playing ad ends.
    /// `Some` exactly while the active period id is an ad.
    pub(super) ad_content_position_us: Option<u64>,
    /// Window-anchored target position awaiting resolution against a real
    /// timeline. Kept until the owning holder is prepared so the position
    /// can be re-resolved when offsets become known.
    pub(super) pending_seek: Option<SeekTarget>,
    pub(super) rebuffering: bool,

    /// Sequence number per (holder uid, window offset) for the current
    /// traversal. Seeks reuse entries; fresh traversals replace them.
    pub(super) window_sequences: HashMap<(Uuid, usize), u64>,
    pub(super) next_window_sequence: u64,

    pub(super) messages: Vec<PendingMessage>,
    pub(super) next_message_seq: u64,

    /// Clock sample from the previous work pass while playing.
    pub(super) clock_anchor_us: Option<u64>,

    pub(super) track_groups: TrackGroupArray,
    pub(super) selector_result: TrackSelectorResult,

    pub(super) released: bool,
}

impl Engine {
    pub(crate) fn new(
        components: EngineComponents,
        shuffle_order: Box<dyn ShuffleOrder>,
        command_rx: UnboundedReceiver<EngineCommand>,
        command_tx: UnboundedSender<EngineCommand>,
        event_tx: UnboundedSender<EngineEvent>,
    ) -> Self {
        let renderer_count = components.renderers.len();
        Self {
            command_rx,
            command_tx,
            event_tx,
            renderer_enabled: vec![false; renderer_count],
            renderers_started: false,
            renderers: components.renderers,
            track_selector: components.track_selector,
            load_control: components.load_control,
            bandwidth_meter: components.bandwidth_meter,
            clock: components.clock,
            allocator: Allocator::default(),
            params: components.params,
            use_lazy_preparation: components.use_lazy_preparation,
            holders: Vec::new(),
            holder_ranges: Vec::new(),
            shuffle_order,
            prepared: false,
            play_when_ready: false,
            repeat_mode: RepeatMode::Off,
            shuffle_enabled: false,
            playback_parameters: PlaybackParameters::default(),
            seek_parameters: SeekParameters::default(),
            foreground_mode: false,
            state: PlaybackState::Idle,
            error: None,
            is_loading: false,
            timeline: Timeline::empty(),
            current: None,
            period_uid: None,
            current_window: 0,
            period_position_us: 0,
            ad_content_position_us: None,
            pending_seek: None,
            rebuffering: false,
            window_sequences: HashMap::new(),
            next_window_sequence: 0,
            messages: Vec::new(),
            next_message_seq: 0,
            clock_anchor_us: None,
            track_groups: TrackGroupArray::EMPTY,
            selector_result: TrackSelectorResult::empty(renderer_count),
            released: false,
        }
    }

    /// Engine task body: consume commands, tick the work loop while playback
    /// can progress.
    pub(crate) async fn run(mut self) {
        info!("playback engine task started");
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.params.work_interval_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.released {
                break;
            }
            tokio::select! {
                // Commands always win over the work tick so facade
                // operations are observed in submission order, promptly.
                biased;
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        // Facade dropped without an explicit release.
                        None => self.handle_command(EngineCommand::Release),
                    }
                    // Drain whatever else queued up before doing work, so a
                    // burst of facade operations is observed atomically.
                    while !self.released {
                        match self.command_rx.try_recv() {
                            Ok(command) => self.handle_command(command),
                            Err(_) => break,
                        }
                    }
                    if !self.released {
                        self.do_some_work();
                    }
                }
                _ = tick.tick(), if self.should_tick() => {
                    self.do_some_work();
                }
            }
        }
        info!("playback engine task stopped");
    }

    /// Whether the work loop should run without an external trigger.
    fn should_tick(&self) -> bool {
        self.prepared
            && matches!(
                self.state,
                PlaybackState::Buffering | PlaybackState::Ready
            )
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Prepare => self.handle_prepare(),
            EngineCommand::SetMediaItems {
                holders,
                start,
                shuffle_order,
            } => self.handle_set_media_items(holders, start, shuffle_order),
            EngineCommand::AddMediaItems {
                index,
                holders,
                shuffle_order,
            } => self.handle_add_media_items(index, holders, shuffle_order),
            EngineCommand::RemoveMediaItems {
                from,
                to,
                shuffle_order,
            } => self.handle_remove_media_items(from, to, shuffle_order),
            EngineCommand::MoveMediaItems {
                from,
                to,
                new_from,
                shuffle_order,
            } => self.handle_move_media_items(from, to, new_from, shuffle_order),
            EngineCommand::SetShuffleOrder { shuffle_order } => {
                self.shuffle_order = shuffle_order;
                self.rebuild_timeline();
                self.emit_update(1, None, false);
            }
            EngineCommand::Seek(target) => self.handle_seek(target),
            EngineCommand::SetPlayWhenReady(play_when_ready) => {
                self.handle_set_play_when_ready(play_when_ready);
            }
            EngineCommand::SetRepeatMode(repeat_mode) => {
                debug!(?repeat_mode, "repeat mode changed");
                self.repeat_mode = repeat_mode;
            }
            EngineCommand::SetShuffleModeEnabled(enabled) => {
                debug!(enabled, "shuffle mode changed");
                self.shuffle_enabled = enabled;
            }
            EngineCommand::SetPlaybackParameters(parameters) => {
                self.playback_parameters = parameters;
                let _ = self.event_tx.send(EngineEvent::PlaybackParameters {
                    parameters,
                    operation_ack: true,
                });
            }
            EngineCommand::SetSeekParameters(parameters) => {
                self.seek_parameters = parameters;
            }
            EngineCommand::SetForegroundMode(foreground) => {
                self.foreground_mode = foreground;
                if !foreground && self.state == PlaybackState::Idle {
                    // Nothing is playing; drop renderer resources eagerly.
                    self.disable_renderers();
                }
            }
            EngineCommand::Stop { reset } => {
                self.stop_internal(reset);
                self.emit_update(1, None, false);
            }
            EngineCommand::Release => self.handle_release(),
            EngineCommand::SendMessage(spec) => self.handle_send_message(spec),
            EngineCommand::SourceInfoRefreshed { holder, timeline } => {
                self.handle_source_info(holder, timeline);
            }
        }
    }

    fn handle_prepare(&mut self) {
        if self.prepared && self.state != PlaybackState::Idle {
            // Facade guards against this; ack anyway to keep counts balanced.
            self.emit_update(1, None, false);
            return;
        }
        info!(playlist_len = self.holders.len(), "engine prepare");
        self.prepared = true;
        self.error = None;
        self.load_control.on_prepared();
        self.rebuild_timeline();
        if self.timeline.is_empty() {
            self.state = PlaybackState::Ended;
        } else {
            self.state = PlaybackState::Buffering;
            self.rebuffering = false;
            if !self.use_lazy_preparation {
                self.prepare_all_sources();
            }
        }
        self.emit_update(1, None, false);
    }

    fn handle_set_media_items(
        &mut self,
        holders: Vec<HolderSpec>,
        start: Option<SeekTarget>,
        shuffle_order: Box<dyn ShuffleOrder>,
    ) {
        debug!(len = holders.len(), "set media items");
        self.release_current_period();
        for holder in self.holders.drain(..) {
            release_holder(holder);
        }
        self.window_sequences.clear();
        self.holders = holders.into_iter().map(new_engine_holder).collect();
        self.shuffle_order = shuffle_order;
        self.period_uid = None;
        self.period_position_us = 0;
        self.ad_content_position_us = None;
        self.current_window = 0;
        // `None` means "default start": resolved against the (possibly
        // shuffled) playback order once the timeline exists.
        self.pending_seek = start;
        self.rebuild_timeline();
        if self.prepared {
            if !self.use_lazy_preparation {
                self.prepare_all_sources();
            }
            self.state = if self.timeline.is_empty() {
                PlaybackState::Ended
            } else {
                PlaybackState::Buffering
            };
        }
        self.emit_update(1, None, false);
    }

    fn handle_add_media_items(
        &mut self,
        index: usize,
        holders: Vec<HolderSpec>,
        shuffle_order: Box<dyn ShuffleOrder>,
    ) {
        debug!(index, len = holders.len(), "add media items");
        let index = index.min(self.holders.len());
        for (offset, spec) in holders.into_iter().enumerate() {
            self.holders.insert(index + offset, new_engine_holder(spec));
        }
        self.shuffle_order = shuffle_order;
        self.rebuild_timeline();
        if self.prepared && !self.use_lazy_preparation {
            self.prepare_all_sources();
        }
        // An ended player does not restart just because content appeared; a
        // seek or an explicit prepare is required.
        self.emit_update(1, None, false);
    }

    fn handle_remove_media_items(
        &mut self,
        from: usize,
        to: usize,
        shuffle_order: Box<dyn ShuffleOrder>,
    ) {
        debug!(from, to, "remove media items");
        let current_holder = self.current.as_ref().map(|active| active.holder);
        let removed: Vec<EngineHolder> = self.holders.drain(from..to.min(self.holders.len())).collect();
        for holder in &removed {
            self.window_sequences
                .retain(|(uid, _), _| uid != &holder.uid);
        }
        let current_removed = current_holder
            .is_some_and(|uid| removed.iter().any(|holder| holder.uid == uid));
        let placeholder_removed = self
            .period_uid
            .is_some_and(|uid| removed.iter().any(|holder| holder.uid == uid));
        for holder in removed {
            release_holder(holder);
        }
        self.shuffle_order = shuffle_order;
        if current_removed || placeholder_removed {
            self.release_current_period();
            self.period_uid = None;
            self.ad_content_position_us = None;
            let fallback = from.min(self.holders.len().saturating_sub(1));
            self.pending_seek = Some(SeekTarget {
                window_index: fallback,
                position_ms: None,
            });
            self.period_position_us = 0;
            if self.prepared && self.state == PlaybackState::Ready {
                self.state = PlaybackState::Buffering;
                self.rebuffering = false;
            }
        }
        self.rebuild_timeline();
        if self.prepared && self.timeline.is_empty() {
            self.state = PlaybackState::Ended;
            self.pending_seek = None;
        }
        self.emit_update(1, None, false);
    }

    fn handle_move_media_items(
        &mut self,
        from: usize,
        to: usize,
        new_from: usize,
        shuffle_order: Box<dyn ShuffleOrder>,
    ) {
        debug!(from, to, new_from, "move media items");
        move_range(&mut self.holders, from, to, new_from);
        self.shuffle_order = shuffle_order;
        self.rebuild_timeline();
        self.emit_update(1, None, false);
    }

    fn handle_set_play_when_ready(&mut self, play_when_ready: bool) {
        if self.play_when_ready == play_when_ready {
            return;
        }
        debug!(play_when_ready, "play-when-ready changed");
        self.play_when_ready = play_when_ready;
        self.clock_anchor_us = None;
        if self.state == PlaybackState::Ready {
            if play_when_ready {
                self.start_renderers();
            } else {
                self.stop_renderers();
            }
        }
    }

    fn handle_release(&mut self) {
        info!("engine release");
        self.stop_internal(/* reset= */ false);
        for holder in self.holders.drain(..) {
            release_holder(holder);
        }
        self.messages.clear();
        self.load_control.on_released();
        self.released = true;
    }

    fn handle_source_info(&mut self, holder_uid: Uuid, timeline: Timeline) {
        let Some(holder) = self.holders.iter_mut().find(|h| h.uid == holder_uid) else {
            // The playlist entry was replaced or removed while the source was
            // still loading; its refresh must not surface.
            debug!(%holder_uid, "suppressing source info for removed playlist entry");
            return;
        };
        debug!(
            %holder_uid,
            windows = timeline.window_count(),
            "source info refreshed"
        );
        holder.timeline = Some(timeline);
        self.rebuild_timeline();
        if self.prepared && self.timeline.is_empty() && self.state != PlaybackState::Ended {
            self.release_current_period();
            self.period_uid = None;
            self.pending_seek = None;
            self.state = PlaybackState::Ended;
        }
        self.emit_update(0, None, false);
    }

    /// Call `prepare` on every source that has not been prepared yet.
    pub(super) fn prepare_all_sources(&mut self) {
        for index in 0..self.holders.len() {
            self.prepare_holder(index);
        }
    }

    /// Call `prepare` on one holder's source, wiring its refreshes back into
    /// the command queue.
    pub(super) fn prepare_holder(&mut self, index: usize) {
        let holder = &mut self.holders[index];
        if holder.prepare_sent {
            return;
        }
        holder.prepare_sent = true;
        let uid = holder.uid;
        let tx = self.command_tx.clone();
        debug!(%uid, "preparing media source");
        holder.source.prepare(Box::new(move |timeline| {
            let _ = tx.send(EngineCommand::SourceInfoRefreshed {
                holder: uid,
                timeline,
            });
        }));
    }

    /// Stop playback and move to idle. `reset` additionally clears the
    /// playlist and releases sources.
    pub(super) fn stop_internal(&mut self, reset: bool) {
        info!(reset, "engine stop");
        self.release_current_period();
        self.disable_renderers();
        self.load_control.on_stopped();
        self.prepared = false;
        self.rebuffering = false;
        self.is_loading = false;
        self.clock_anchor_us = None;
        self.state = PlaybackState::Idle;
        if reset {
            for holder in self.holders.drain(..) {
                release_holder(holder);
            }
            self.window_sequences.clear();
            self.messages.clear();
            self.error = None;
            self.pending_seek = None;
            self.period_uid = None;
            self.current_window = 0;
            self.period_position_us = 0;
            self.ad_content_position_us = None;
            self.rebuild_timeline();
        } else {
            // Keep position so a later prepare resumes where playback
            // stopped. A stop during an ad resumes at the content position.
            if self.pending_seek.is_none() {
                let resume_us = self.resume_window_position_us();
                self.pending_seek = Some(SeekTarget {
                    window_index: self.current_window,
                    position_ms: Some(resume_us / 1000),
                });
            }
            self.ad_content_position_us = None;
            self.period_uid = None;
        }
    }

    pub(super) fn start_renderers(&mut self) {
        if self.renderers_started {
            return;
        }
        for (index, renderer) in self.renderers.iter_mut().enumerate() {
            if self.renderer_enabled[index] {
                if let Err(error) = renderer.start() {
                    warn!(%error, "renderer start failed");
                }
            }
        }
        self.renderers_started = true;
    }

    pub(super) fn stop_renderers(&mut self) {
        if !self.renderers_started {
            return;
        }
        for (index, renderer) in self.renderers.iter_mut().enumerate() {
            if self.renderer_enabled[index] {
                if let Err(error) = renderer.stop() {
                    warn!(%error, "renderer stop failed");
                }
            }
        }
        self.renderers_started = false;
    }

    pub(super) fn disable_renderers(&mut self) {
        self.stop_renderers();
        for (index, renderer) in self.renderers.iter_mut().enumerate() {
            if self.renderer_enabled[index] {
                if let Err(error) = renderer.disable() {
                    warn!(%error, "renderer disable failed");
                }
                self.renderer_enabled[index] = false;
            }
        }
    }

    /// Release the active media period back to its source.
    pub(super) fn release_current_period(&mut self) {
        if let Some(active) = self.current.take() {
            self.disable_renderers();
            if let Some(holder) = self.holders.iter().find(|h| h.uid == active.holder) {
                holder.source.release_period(active.period);
            }
        }
    }

    /// Holder index and window offset for a window of the concatenated
    /// timeline.
    pub(super) fn holder_of_window(&self, window_index: usize) -> Option<(usize, usize)> {
        self.holder_ranges
            .iter()
            .position(|(_, range)| range.contains(&window_index))
            .map(|holder_index| {
                let offset = window_index - self.holder_ranges[holder_index].1.start;
                (holder_index, offset)
            })
    }

    /// Sequence number for a window, allocating one on first use. Reused by
    /// later seeks while the playlist entry survives.
    pub(super) fn sequence_for_window(&mut self, window_index: usize) -> u64 {
        let Some((holder_index, offset)) = self.holder_of_window(window_index) else {
            return 0;
        };
        let key = (self.holder_ranges[holder_index].0, offset);
        if let Some(&sequence) = self.window_sequences.get(&key) {
            return sequence;
        }
        let sequence = self.next_window_sequence;
        self.next_window_sequence += 1;
        self.window_sequences.insert(key, sequence);
        sequence
    }

    /// Fresh sequence number for a new traversal of a window (repeat modes).
    pub(super) fn new_sequence_for_window(&mut self, window_index: usize) -> u64 {
        if let Some((holder_index, offset)) = self.holder_of_window(window_index) {
            let key = (self.holder_ranges[holder_index].0, offset);
            self.window_sequences.remove(&key);
        }
        self.sequence_for_window(window_index)
    }
}

fn new_engine_holder(spec: HolderSpec) -> EngineHolder {
    EngineHolder {
        uid: spec.uid,
        source: spec.source,
        prepare_sent: false,
        timeline: None,
    }
}

fn release_holder(holder: EngineHolder) {
    if holder.prepare_sent {
        holder.source.release();
    }
}
