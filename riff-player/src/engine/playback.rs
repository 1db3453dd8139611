//! Engine work loop
//!
//! **Responsibilities:**
//! - Timeline rebuilds and position remapping after playlist changes
//! - Seek processing and pending-target resolution
//! - Period lifecycle: creation, renderer enable, transitions
//! - State machine transitions (buffering/ready/ended) and error handling
//! - `PlaybackInfo` production and emission toward the application thread

use std::sync::Arc;

use riff_common::time::ms_to_us;
use riff_common::{DiscontinuityReason, PlaybackState};
use tracing::{debug, warn};
use uuid::Uuid;

use super::core::{ActivePeriod, Engine};
use super::{EngineEvent, PlaybackInfoUpdate, SeekTarget};
use crate::error::PlayerError;
use crate::playback_info::PlaybackInfo;
use crate::playlist::concatenate_timeline;
use crate::renderer::RendererCapabilities;
use crate::shuffle::playback_order;
use crate::timeline::{MediaPeriodId, Timeline};

impl Engine {
    /// Rebuild the concatenated timeline from the holders and remap the
    /// current position onto it.
    pub(super) fn rebuild_timeline(&mut self) {
        let children: Vec<(Uuid, Option<&Timeline>)> = self
            .holders
            .iter()
            .map(|holder| (holder.uid, holder.timeline.as_ref()))
            .collect();
        let order = playback_order(self.shuffle_order.as_ref());
        let (timeline, ranges) = concatenate_timeline(&children, &order);
        self.timeline = timeline;
        self.holder_ranges = ranges;
        self.prune_messages();

        if let Some(uid) = self.period_uid {
            if let Some(period_index) = self.timeline.index_of_period(&uid) {
                self.current_window = self.timeline.period(period_index).window_index;
            } else {
                // The period vanished: a placeholder was replaced by real
                // content, or its playlist entry went away. Fall back to a
                // window-anchored target so the position survives.
                self.release_current_period();
                self.period_uid = None;
                if self.pending_seek.is_none() && !self.timeline.is_empty() {
                    self.pending_seek = Some(SeekTarget {
                        window_index: self
                            .current_window
                            .min(self.timeline.window_count() - 1),
                        position_ms: Some(self.period_position_us / 1000),
                    });
                }
            }
        }
    }

    pub(super) fn handle_seek(&mut self, target: SeekTarget) {
        debug!(
            window = target.window_index,
            position_ms = ?target.position_ms,
            "seek"
        );
        self.rebuffering = false;
        self.clock_anchor_us = None;
        if self.state == PlaybackState::Ended && !self.timeline.is_empty() {
            self.state = PlaybackState::Buffering;
        }
        if self.timeline.is_empty() {
            // Nothing to resolve against yet; keep the target anchored.
            self.period_position_us = ms_to_us(target.position_ms.unwrap_or(0));
            self.current_window = target.window_index;
            self.pending_seek = Some(target);
            self.emit_update(1, None, true);
            return;
        }
        let window = target.window_index.min(self.timeline.window_count() - 1);
        let window_position_us = target
            .position_ms
            .map(ms_to_us)
            .unwrap_or_else(|| self.timeline.window(window).default_position_us);

        // The period is recreated at the target position; the window keeps
        // its sequence number, so repeated seeks into one window never look
        // like fresh traversals.
        if let Some((uid, period_position_us)) = self
            .timeline
            .resolve_window_position(window, window_position_us)
        {
            self.reset_renderer_positions(period_position_us);
            self.release_current_period();
            self.period_uid = Some(uid);
            self.period_position_us = period_position_us;
            self.current_window = window;
            self.sequence_for_window(window);
            self.rearm_messages_after_seek(window, window_position_us);
        }
        self.pending_seek = Some(SeekTarget {
            window_index: window,
            position_ms: target.position_ms,
        });
        if self.prepared {
            self.state = PlaybackState::Buffering;
        }
        self.emit_update(1, None, true);
    }

    /// One pass of the work loop.
    pub(super) fn do_some_work(&mut self) {
        if !self.prepared || self.released || self.error.is_some() {
            return;
        }
        if self.timeline.is_empty() {
            if matches!(self.state, PlaybackState::Buffering | PlaybackState::Ready) {
                self.release_current_period();
                self.state = PlaybackState::Ended;
                self.emit_update(0, None, false);
            }
            return;
        }
        if !matches!(self.state, PlaybackState::Buffering | PlaybackState::Ready) {
            return;
        }

        if self.current.is_none() && !self.try_start_current_period() {
            return;
        }

        if let Err(error) = self.poll_current_source_error() {
            self.fail(error);
            return;
        }

        self.update_loading();

        if let Err(error) = self.render_pass() {
            self.fail(error);
            return;
        }

        self.update_readiness();
        self.advance_position();

        // Positioned messages trigger on content positions, never while an
        // ad is being read.
        let playing_ad = self
            .current
            .as_ref()
            .is_some_and(|active| active.id.is_ad());
        if !playing_ad {
            let window_position_us = self.current_window_position_us();
            self.deliver_due_messages(self.current_window, window_position_us);
        }

        if self.current_period_ended() {
            self.advance_period();
        }
    }

    /// Resolve the pending target and create the media period for it.
    /// Returns false when progress is blocked (source unprepared or failed).
    fn try_start_current_period(&mut self) -> bool {
        let target = match self.pending_seek.clone() {
            Some(target) => target,
            // No explicit target but a known position: resume there.
            None if self.period_uid.is_some() => SeekTarget {
                window_index: self.current_window,
                position_ms: Some(self.current_window_position_us() / 1000),
            },
            // Fresh start: the first window in playback order.
            None => SeekTarget {
                window_index: self
                    .timeline
                    .first_window_index(self.shuffle_enabled)
                    .unwrap_or(0),
                position_ms: None,
            },
        };
        let window = target
            .window_index
            .min(self.timeline.window_count() - 1);

        let Some((holder_index, _)) = self.holder_of_window(window) else {
            return false;
        };
        if !self.holders[holder_index].prepare_sent {
            self.prepare_holder(holder_index);
        }
        if let Err(error) = self.holders[holder_index].source.check_error() {
            self.fail(error);
            return false;
        }
        if self.holders[holder_index].timeline.is_none() {
            // Placeholder window: remember the target so getters and the
            // window sequence number stay stable, then wait for the source.
            let holder_uid = self.holders[holder_index].uid;
            self.current_window = window;
            self.period_position_us = target.position_ms.map(ms_to_us).unwrap_or(0);
            self.period_uid = Some(holder_uid);
            self.sequence_for_window(window);
            self.pending_seek = Some(target);
            return false;
        }

        let window_position_us = target
            .position_ms
            .map(ms_to_us)
            .unwrap_or_else(|| self.timeline.window(window).default_position_us);
        let Some((uid, period_position_us)) = self
            .timeline
            .resolve_window_position(window, window_position_us)
        else {
            return false;
        };
        let sequence = self.sequence_for_window(window);
        let id = self.period_id_for_position(uid, sequence, period_position_us);
        let is_ad = id.is_ad();
        let period = self.holders[holder_index]
            .source
            .create_period(&id, &self.allocator);
        debug!(%uid, sequence, window, ad = is_ad, "media period created");
        self.current = Some(ActivePeriod {
            id,
            period,
            holder: self.holders[holder_index].uid,
        });
        self.current_window = window;
        self.period_uid = Some(uid);
        if is_ad {
            // The ad is read from its own start; the content position is
            // restored once the ad ends.
            self.ad_content_position_us = Some(period_position_us);
            self.period_position_us = 0;
        } else {
            self.ad_content_position_us = None;
            self.period_position_us = period_position_us;
        }
        self.pending_seek = None;

        if let Err(error) = self.enable_renderers_for_current() {
            self.fail(error);
            return false;
        }
        self.emit_update(0, None, false);
        true
    }

    /// Select tracks for the active period and enable renderers accordingly.
    fn enable_renderers_for_current(&mut self) -> Result<(), PlayerError> {
        let Some(active) = self.current.as_mut() else {
            return Ok(());
        };
        let track_groups = active.period.track_groups();
        let capabilities: Vec<&dyn RendererCapabilities> = self
            .renderers
            .iter()
            .map(|renderer| renderer.as_ref() as &dyn RendererCapabilities)
            .collect();
        let result = self.track_selector.select_tracks(
            &capabilities,
            &track_groups,
            &active.id,
            &self.timeline,
        )?;
        drop(capabilities);

        let position_us = self.period_position_us;
        for (index, selection) in result.selections.iter().enumerate() {
            if let Some(selection) = selection {
                let Some(stream) = active.period.select_stream(selection.group_index) else {
                    return Err(PlayerError::TrackSelection(format!(
                        "period did not provide a stream for group {}",
                        selection.group_index
                    )));
                };
                self.renderers[index].enable(selection, stream, position_us)?;
                self.renderer_enabled[index] = true;
            }
        }
        self.track_selector.on_selection_activated(&result);
        self.track_groups = track_groups;
        self.selector_result = result;
        // The previous period's renderers were stopped when it was released;
        // restart the fresh ones when playback is already running.
        self.renderers_started = false;
        if self.play_when_ready && self.state == PlaybackState::Ready {
            self.start_renderers();
        }
        Ok(())
    }

    fn poll_current_source_error(&mut self) -> Result<(), PlayerError> {
        let Some(active) = self.current.as_ref() else {
            return Ok(());
        };
        match self.holders.iter().find(|h| h.uid == active.holder) {
            Some(holder) => holder.source.check_error(),
            None => Ok(()),
        }
    }

    fn update_loading(&mut self) {
        let Some(active) = self.current.as_mut() else {
            return;
        };
        let position_us = self.period_position_us;
        let buffered_duration_us = match active.period.buffered_position_us() {
            Some(buffered) => buffered.saturating_sub(position_us),
            None => u64::MAX,
        };
        if buffered_duration_us != u64::MAX
            && self.load_control.should_continue_loading(buffered_duration_us)
        {
            active.period.continue_loading(position_us);
        }
        let is_loading = active.period.is_loading();
        if is_loading != self.is_loading {
            self.is_loading = is_loading;
            self.emit_update(0, None, false);
        }
    }

    fn render_pass(&mut self) -> Result<(), PlayerError> {
        let position_us = self.period_position_us;
        for (index, renderer) in self.renderers.iter_mut().enumerate() {
            if self.renderer_enabled[index] {
                renderer.render(position_us)?;
            }
        }
        Ok(())
    }

    fn update_readiness(&mut self) {
        let renderers_ready = self
            .renderers
            .iter()
            .enumerate()
            .filter(|(index, _)| self.renderer_enabled[*index])
            .all(|(_, renderer)| renderer.is_ready());
        let buffered_enough = self.buffered_enough_to_start();

        match self.state {
            PlaybackState::Buffering if renderers_ready && buffered_enough => {
                self.state = PlaybackState::Ready;
                self.rebuffering = false;
                if self.play_when_ready {
                    self.start_renderers();
                }
                self.emit_update(0, None, false);
            }
            PlaybackState::Ready if !renderers_ready => {
                // Read underrun.
                self.state = PlaybackState::Buffering;
                self.rebuffering = true;
                self.clock_anchor_us = None;
                self.emit_update(0, None, false);
            }
            _ => {}
        }
    }

    fn buffered_enough_to_start(&mut self) -> bool {
        let Some(active) = self.current.as_ref() else {
            return false;
        };
        match active.period.buffered_position_us() {
            // Buffered to the end of the period: always enough.
            None => true,
            Some(buffered) => {
                let ahead = buffered.saturating_sub(self.period_position_us);
                self.load_control
                    .should_start_playback(ahead, self.rebuffering)
            }
        }
    }

    fn advance_position(&mut self) {
        let now_us = self.clock.elapsed_us();
        if self.state == PlaybackState::Ready && self.play_when_ready {
            if let Some(anchor) = self.clock_anchor_us {
                let elapsed = now_us.saturating_sub(anchor);
                let advanced =
                    (elapsed as f64 * self.playback_parameters.speed as f64) as u64;
                self.period_position_us = self.period_position_us.saturating_add(advanced);
            }
            self.clock_anchor_us = Some(now_us);
        } else {
            self.clock_anchor_us = None;
        }
        if let Some(duration) = self.current_period_duration_us() {
            self.period_position_us = self.period_position_us.min(duration);
        }
    }

    fn current_period_duration_us(&self) -> Option<u64> {
        let uid = self.period_uid?;
        self.timeline.period_by_uid(&uid)?.duration_us
    }

    fn current_period_ended(&self) -> bool {
        if self.current.is_none() {
            return false;
        }
        let mut any_enabled = false;
        for (index, renderer) in self.renderers.iter().enumerate() {
            if self.renderer_enabled[index] {
                any_enabled = true;
                if !renderer.is_ended() {
                    return false;
                }
            }
        }
        if any_enabled {
            return true;
        }
        // No renderer consumes this period; fall back to its duration.
        self.current_period_duration_us()
            .is_some_and(|duration| self.period_position_us >= duration)
    }

    /// Move to the next period, honoring repeat mode and the shuffle order.
    /// A finished ad resumes its own period's content first.
    fn advance_period(&mut self) {
        let (current_uid, current_sequence) = match self.current.as_ref() {
            Some(active) => (active.id.period_uid, active.id.window_sequence_number),
            None => return,
        };
        let playing_ad = self
            .current
            .as_ref()
            .is_some_and(|active| active.id.is_ad());
        if playing_ad {
            let Some(window_index) = self.timeline.window_index_of_period(&current_uid) else {
                return;
            };
            let resume_us = self.ad_content_position_us.take().unwrap_or(0);
            self.swap_to_period(current_uid, current_sequence, window_index, resume_us);
            self.emit_update(0, Some(DiscontinuityReason::AdInsertion), false);
            return;
        }
        let Some(period_index) = self.timeline.index_of_period(&current_uid) else {
            return;
        };
        let window_index = self.timeline.period(period_index).window_index;
        let window = self.timeline.window(window_index).clone();

        // Flush messages positioned at the tail of the window before leaving.
        if let Some(duration) = window.duration_us {
            self.deliver_due_messages(window_index, duration);
        }

        if period_index < window.last_period_index {
            // Next period of the same window; the sequence number is shared
            // within one traversal of the window.
            let next_uid = self.timeline.period(period_index + 1).uid;
            self.swap_to_period(next_uid, current_sequence, window_index, 0);
            self.emit_update(0, Some(DiscontinuityReason::PeriodTransition), false);
            return;
        }

        match self
            .timeline
            .next_window_index(window_index, self.repeat_mode, self.shuffle_enabled)
        {
            Some(next_window) => {
                debug!(from = window_index, to = next_window, "window transition");
                self.release_current_period();
                self.period_uid = None;
                self.new_sequence_for_window(next_window);
                self.rearm_messages_for_window(next_window);
                self.current_window = next_window;
                self.period_position_us = 0;
                self.pending_seek = Some(SeekTarget {
                    window_index: next_window,
                    position_ms: None,
                });
                // Create the next period in the same pass when possible so a
                // transition does not bounce through an observable gap.
                self.try_start_current_period();
                self.emit_update(0, Some(DiscontinuityReason::PeriodTransition), false);
            }
            None => {
                debug!("playlist finished");
                if let Some(duration) = self.current_period_duration_us() {
                    self.period_position_us = duration;
                }
                self.stop_renderers();
                self.state = PlaybackState::Ended;
                self.clock_anchor_us = None;
                self.emit_update(0, None, false);
            }
        }
    }

    /// Replace the active period with a content period of the same holder,
    /// starting at `position_us`.
    fn swap_to_period(&mut self, uid: Uuid, sequence: u64, window_index: usize, position_us: u64) {
        let holder_uid = self.current.as_ref().map(|active| active.holder);
        self.release_current_period();
        let Some(holder_uid) = holder_uid else { return };
        let Some(holder) = self.holders.iter().find(|h| h.uid == holder_uid) else {
            return;
        };
        let id = MediaPeriodId::new(uid, sequence);
        let period = holder.source.create_period(&id, &self.allocator);
        self.current = Some(ActivePeriod {
            id,
            period,
            holder: holder_uid,
        });
        self.current_window = window_index;
        self.period_uid = Some(uid);
        self.period_position_us = position_us;
        self.ad_content_position_us = None;
        if let Err(error) = self.enable_renderers_for_current() {
            self.fail(error);
        }
    }

    /// Ad-aware period identity: entering a period at the position of a
    /// declared ad break plays that break's first ad before the content.
    /// Ads entered any other way (mid-break resumption, played-ad tracking)
    /// are the source's concern, not the coordinator's.
    fn period_id_for_position(
        &self,
        uid: Uuid,
        sequence: u64,
        period_position_us: u64,
    ) -> MediaPeriodId {
        let ad_group = self
            .timeline
            .period_by_uid(&uid)
            .and_then(|period| period.ad_playback_state.as_ref())
            .and_then(|ads| {
                ads.breaks.iter().position(|ad_break| {
                    ad_break.time_us == Some(period_position_us)
                        && !ad_break.ad_durations_us.is_empty()
                })
            });
        match ad_group {
            Some(group) => MediaPeriodId::for_ad(uid, sequence, group, 0),
            None => MediaPeriodId::new(uid, sequence),
        }
    }

    /// Window-relative resume position. While an ad plays this is the
    /// content position behind the ad, not the ad-relative read position.
    pub(super) fn resume_window_position_us(&mut self) -> u64 {
        match self.ad_content_position_us.take() {
            Some(content_us) => match self.period_uid {
                Some(uid) => self
                    .timeline
                    .window_position_us(&uid, content_us)
                    .unwrap_or(content_us),
                None => content_us,
            },
            None => self.current_window_position_us(),
        }
    }

    pub(super) fn reset_renderer_positions(&mut self, position_us: u64) {
        for (index, renderer) in self.renderers.iter_mut().enumerate() {
            if self.renderer_enabled[index] {
                if let Err(error) = renderer.reset_position(position_us) {
                    warn!(%error, "renderer position reset failed");
                }
            }
        }
    }

    /// Fatal playback error: surface through `PlaybackInfo`, move to idle,
    /// keep the playlist and position.
    pub(super) fn fail(&mut self, error: PlayerError) {
        warn!(%error, "playback failed");
        self.release_current_period();
        if self.pending_seek.is_none() && !self.timeline.is_empty() {
            let resume_us = self.resume_window_position_us();
            self.pending_seek = Some(SeekTarget {
                window_index: self.current_window,
                position_ms: Some(resume_us / 1000),
            });
        }
        self.ad_content_position_us = None;
        self.period_uid = None;
        self.prepared = false;
        self.rebuffering = false;
        self.is_loading = false;
        self.clock_anchor_us = None;
        self.state = PlaybackState::Idle;
        self.error = Some(Arc::new(error));
        self.emit_update(0, None, false);
    }

    /// Window-relative rendering of the current position.
    pub(super) fn current_window_position_us(&self) -> u64 {
        match self.period_uid {
            Some(uid) => self
                .timeline
                .window_position_us(&uid, self.period_position_us)
                .unwrap_or(self.period_position_us),
            None => self.period_position_us,
        }
    }

    /// Snapshot the engine state into a fresh `PlaybackInfo`.
    pub(super) fn build_playback_info(&self) -> PlaybackInfo {
        let (period_id, position_us) = self.snapshot_position();
        let buffered_position_us = match self.current.as_ref() {
            Some(active) => match active.period.buffered_position_us() {
                Some(buffered) => buffered,
                None => self
                    .current_period_duration_us()
                    .unwrap_or(position_us),
            },
            None => position_us,
        };
        PlaybackInfo {
            timeline: self.timeline.clone(),
            period_id: period_id.clone(),
            position_us,
            content_position_us: if period_id.is_ad() {
                self.ad_content_position_us
            } else {
                Some(position_us)
            },
            playback_state: self.state,
            playback_error: self.error.clone(),
            is_loading: self.is_loading,
            track_groups: self.track_groups.clone(),
            track_selector_result: self.selector_result.clone(),
            loading_period_id: period_id,
            buffered_position_us,
            total_buffered_duration_us: buffered_position_us.saturating_sub(position_us),
        }
    }

    /// Current period identity and period-relative position, falling back to
    /// the pending window-anchored target when no period is resolved (after a
    /// stop, an error, or while a source is still unprepared).
    fn snapshot_position(&self) -> (MediaPeriodId, u64) {
        if let Some(active) = self.current.as_ref() {
            return (active.id.clone(), self.period_position_us);
        }
        if let Some(uid) = self.period_uid {
            return (
                MediaPeriodId::new(uid, self.sequence_peek(self.current_window)),
                self.period_position_us,
            );
        }
        if let Some(target) = &self.pending_seek {
            if !self.timeline.is_empty() {
                let window = target.window_index.min(self.timeline.window_count() - 1);
                let window_position_us = target
                    .position_ms
                    .map(ms_to_us)
                    .unwrap_or_else(|| self.timeline.window(window).default_position_us);
                if let Some((uid, period_position_us)) = self
                    .timeline
                    .resolve_window_position(window, window_position_us)
                {
                    return (
                        MediaPeriodId::new(uid, self.sequence_peek(window)),
                        period_position_us,
                    );
                }
            }
        }
        (MediaPeriodId::new(Uuid::nil(), 0), self.period_position_us)
    }

    fn sequence_peek(&self, window_index: usize) -> u64 {
        self.holder_of_window(window_index)
            .and_then(|(holder_index, offset)| {
                let key = (self.holder_ranges[holder_index].0, offset);
                self.window_sequences.get(&key).copied()
            })
            .unwrap_or(0)
    }

    /// Post a `PlaybackInfo` update to the application thread.
    pub(super) fn emit_update(
        &mut self,
        operation_acks: u32,
        discontinuity: Option<DiscontinuityReason>,
        seek_processed: bool,
    ) {
        let info = self.build_playback_info();
        let holder_timelines = self
            .holders
            .iter()
            .filter_map(|holder| {
                holder
                    .timeline
                    .clone()
                    .map(|timeline| (holder.uid, timeline))
            })
            .collect();
        let _ = self
            .event_tx
            .send(EngineEvent::PlaybackInfo(PlaybackInfoUpdate {
                info,
                operation_acks,
                discontinuity,
                seek_processed,
                holder_timelines,
            }));
    }
}
