//! Authoritative playback snapshot
//!
//! `PlaybackInfo` is produced only by the internal playback engine and owned
//! by the facade. Every change yields a fresh value; the previous snapshot is
//! what listener change-detection diffs against.

use std::sync::Arc;

use riff_common::PlaybackState;
use uuid::Uuid;

use crate::error::PlayerError;
use crate::timeline::{MediaPeriodId, Timeline};
use crate::track::{TrackGroupArray, TrackSelectorResult};

/// Immutable snapshot of the engine's externally relevant playback state.
#[derive(Debug, Clone)]
pub struct PlaybackInfo {
    /// Authoritative timeline (or the facade's masked stand-in).
    pub timeline: Timeline,
    /// Identity of the playing period.
    pub period_id: MediaPeriodId,
    /// Playback position within the playing period, in microseconds.
    pub position_us: u64,
    /// Content position while an ad is playing; `None` when unknown.
    pub content_position_us: Option<u64>,
    pub playback_state: PlaybackState,
    /// Fatal playback error; non-`None` implies `playback_state == Idle`.
    pub playback_error: Option<Arc<PlayerError>>,
    /// Whether the loading period is actively loading.
    pub is_loading: bool,
    pub track_groups: TrackGroupArray,
    pub track_selector_result: TrackSelectorResult,
    /// Identity of the period currently loading (equals `period_id` unless
    /// the engine reads ahead).
    pub loading_period_id: MediaPeriodId,
    /// Buffered position within the playing period, in microseconds.
    pub buffered_position_us: u64,
    /// Total buffered media ahead of the playback position.
    pub total_buffered_duration_us: u64,
}

impl PlaybackInfo {
    /// Initial snapshot used before the engine has produced anything.
    pub fn dummy(renderer_count: usize) -> Self {
        let period_id = MediaPeriodId::new(Uuid::nil(), 0);
        Self {
            timeline: Timeline::empty(),
            period_id: period_id.clone(),
            position_us: 0,
            content_position_us: Some(0),
            playback_state: PlaybackState::Idle,
            playback_error: None,
            is_loading: false,
            track_groups: TrackGroupArray::EMPTY,
            track_selector_result: TrackSelectorResult::empty(renderer_count),
            loading_period_id: period_id,
            buffered_position_us: 0,
            total_buffered_duration_us: 0,
        }
    }

    /// Copy of this snapshot with a different timeline.
    pub fn copy_with_timeline(&self, timeline: Timeline) -> Self {
        Self {
            timeline,
            ..self.clone()
        }
    }

    /// Copy of this snapshot with a different position.
    pub fn copy_with_position(
        &self,
        period_id: MediaPeriodId,
        position_us: u64,
        content_position_us: Option<u64>,
    ) -> Self {
        Self {
            period_id,
            position_us,
            content_position_us,
            ..self.clone()
        }
    }

    /// Whether this snapshot is playing an ad.
    pub fn is_playing_ad(&self) -> bool {
        self.period_id.is_ad()
    }
}
