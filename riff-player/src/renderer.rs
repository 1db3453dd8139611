//! Renderer, track selection and load control capabilities
//!
//! These are the engine-side collaborators injected at construction. The
//! engine owns them outright; nothing here is reachable from the application
//! thread once the player is built.

use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::message::{MessagePayload, MessageType};
use crate::source::SampleStream;
use crate::timeline::{MediaPeriodId, Timeline};
use crate::track::{Format, TrackGroupArray, TrackSelection, TrackSelectorResult, TrackType};

/// The subset of a renderer the track selector is allowed to see.
pub trait RendererCapabilities {
    fn track_type(&self) -> TrackType;
    fn supports_format(&self, format: &Format) -> bool;
}

/// Consumes media of one track type from a sample stream.
///
/// Lifecycle: `enable` → `start` → (`render` repeatedly) → `stop` →
/// `disable`. `reset_position` may be called while enabled to discard
/// buffered data after a seek.
pub trait Renderer: RendererCapabilities + Send {
    /// Attach the renderer to a stream at the given position.
    fn enable(
        &mut self,
        selection: &TrackSelection,
        stream: Box<dyn SampleStream>,
        position_us: u64,
    ) -> Result<()>;

    /// Begin consuming. Only called while enabled.
    fn start(&mut self) -> Result<()>;

    /// Make progress: read from the stream, decode, advance.
    fn render(&mut self, position_us: u64) -> Result<()>;

    /// Whether the renderer can render from the current position immediately.
    fn is_ready(&self) -> bool;

    /// Whether the renderer has consumed its stream to the end.
    fn is_ended(&self) -> bool;

    /// Stop consuming; may be restarted with `start`.
    fn stop(&mut self) -> Result<()>;

    /// Detach from the current stream.
    fn disable(&mut self) -> Result<()>;

    /// Discard buffered data and continue from `position_us`.
    fn reset_position(&mut self, position_us: u64) -> Result<()>;

    /// Handle a targeted message. Must accept at least
    /// [`crate::message::MSG_SET_SURFACE`]; unknown types should be ignored.
    fn handle_message(
        &mut self,
        message_type: MessageType,
        payload: Option<&MessagePayload>,
    ) -> Result<()>;
}

/// Chooses tracks for the available renderers.
pub trait TrackSelector: Send {
    fn select_tracks(
        &mut self,
        capabilities: &[&dyn RendererCapabilities],
        track_groups: &TrackGroupArray,
        period_id: &MediaPeriodId,
        timeline: &Timeline,
    ) -> Result<TrackSelectorResult>;

    /// Called once a selection produced by this selector becomes active.
    fn on_selection_activated(&mut self, result: &TrackSelectorResult);
}

/// Track selector that assigns each renderer the first unclaimed group with
/// a supported format.
#[derive(Debug, Default)]
pub struct DefaultTrackSelector;

impl TrackSelector for DefaultTrackSelector {
    fn select_tracks(
        &mut self,
        capabilities: &[&dyn RendererCapabilities],
        track_groups: &TrackGroupArray,
        _period_id: &MediaPeriodId,
        _timeline: &Timeline,
    ) -> Result<TrackSelectorResult> {
        let mut selections = vec![None; capabilities.len()];
        let mut claimed = vec![false; track_groups.len()];
        for (renderer_index, renderer) in capabilities.iter().enumerate() {
            for (group_index, group) in track_groups.groups.iter().enumerate() {
                if claimed[group_index] {
                    continue;
                }
                let supported = group
                    .formats
                    .iter()
                    .position(|f| renderer.supports_format(f));
                if let Some(track_index) = supported {
                    selections[renderer_index] =
                        Some(TrackSelection::single(group_index, track_index));
                    claimed[group_index] = true;
                    break;
                }
            }
        }
        Ok(TrackSelectorResult { selections })
    }

    fn on_selection_activated(&mut self, _result: &TrackSelectorResult) {}
}

/// Controls when buffering is sufficient to start or resume playback.
pub trait LoadControl: Send {
    fn on_prepared(&mut self);

    /// Whether the loading period should keep loading given how much is
    /// buffered ahead of the playback position.
    fn should_continue_loading(&mut self, buffered_duration_us: u64) -> bool;

    /// Whether playback may start (or resume after a rebuffer).
    fn should_start_playback(&mut self, buffered_duration_us: u64, rebuffering: bool) -> bool;

    fn on_stopped(&mut self);

    fn on_released(&mut self);
}

/// Duration-threshold load control.
#[derive(Debug, Clone)]
pub struct DefaultLoadControl {
    /// Stop requesting more data once this much is buffered.
    pub max_buffer_us: u64,
    /// Buffer required before starting playback.
    pub buffer_for_playback_us: u64,
    /// Buffer required before resuming after a rebuffer.
    pub buffer_for_playback_after_rebuffer_us: u64,
}

impl Default for DefaultLoadControl {
    fn default() -> Self {
        Self {
            max_buffer_us: 50_000_000,
            buffer_for_playback_us: 2_500_000,
            buffer_for_playback_after_rebuffer_us: 5_000_000,
        }
    }
}

impl LoadControl for DefaultLoadControl {
    fn on_prepared(&mut self) {}

    fn should_continue_loading(&mut self, buffered_duration_us: u64) -> bool {
        buffered_duration_us < self.max_buffer_us
    }

    fn should_start_playback(&mut self, buffered_duration_us: u64, rebuffering: bool) -> bool {
        let required = if rebuffering {
            self.buffer_for_playback_after_rebuffer_us
        } else {
            self.buffer_for_playback_us
        };
        buffered_duration_us >= required
    }

    fn on_stopped(&mut self) {}

    fn on_released(&mut self) {}
}

/// Provides bandwidth estimates. Consumed opaquely by the engine.
pub trait BandwidthMeter: Send + Sync {
    /// Current estimate in bits per second, if one exists.
    fn bitrate_estimate(&self) -> Option<u64>;
}

/// Bandwidth meter with no estimate.
#[derive(Debug, Default)]
pub struct DefaultBandwidthMeter;

impl BandwidthMeter for DefaultBandwidthMeter {
    fn bitrate_estimate(&self) -> Option<u64> {
        None
    }
}

/// Monotonic time source used by the engine to advance playback positions.
pub trait Clock: Send + Sync {
    /// Microseconds elapsed since an arbitrary fixed origin.
    fn elapsed_us(&self) -> u64;
}

/// Clock backed by [`std::time::Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn elapsed_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Shared clock handle used across the engine.
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackGroup;
    use uuid::Uuid;

    struct Caps(TrackType);

    impl RendererCapabilities for Caps {
        fn track_type(&self) -> TrackType {
            self.0
        }

        fn supports_format(&self, format: &Format) -> bool {
            format.track_type == self.0
        }
    }

    #[test]
    fn default_selector_assigns_first_supported_group() {
        let mut selector = DefaultTrackSelector;
        let audio = Caps(TrackType::Audio);
        let video = Caps(TrackType::Video);
        let groups = TrackGroupArray::new(vec![
            TrackGroup::new(vec![Format::new("video/avc", TrackType::Video)]),
            TrackGroup::new(vec![Format::new("audio/mp4a-latm", TrackType::Audio)]),
        ]);
        let result = selector
            .select_tracks(
                &[&audio, &video],
                &groups,
                &MediaPeriodId::new(Uuid::new_v4(), 0),
                &Timeline::empty(),
            )
            .unwrap();
        assert_eq!(result.selections[0], Some(TrackSelection::single(1, 0)));
        assert_eq!(result.selections[1], Some(TrackSelection::single(0, 0)));
    }

    #[test]
    fn default_selector_leaves_unsupported_renderers_disabled() {
        let mut selector = DefaultTrackSelector;
        let text = Caps(TrackType::Text);
        let groups = TrackGroupArray::new(vec![TrackGroup::new(vec![Format::new(
            "audio/mp4a-latm",
            TrackType::Audio,
        )])]);
        let result = selector
            .select_tracks(
                &[&text],
                &groups,
                &MediaPeriodId::new(Uuid::new_v4(), 0),
                &Timeline::empty(),
            )
            .unwrap();
        assert_eq!(result.selections[0], None);
    }

    #[test]
    fn default_load_control_thresholds() {
        let mut lc = DefaultLoadControl::default();
        assert!(!lc.should_start_playback(1_000_000, false));
        assert!(lc.should_start_playback(2_500_000, false));
        assert!(!lc.should_start_playback(2_500_000, true));
        assert!(lc.should_start_playback(5_000_000, true));
        assert!(lc.should_continue_loading(10_000_000));
        assert!(!lc.should_continue_loading(60_000_000));
    }
}
