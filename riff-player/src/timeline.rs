//! Timeline model
//!
//! A `Timeline` is a finite ordered sequence of windows, each backed by one
//! or more periods. Windows are the user-facing playlist items; periods are
//! the scheduling unit with a stable identity. The engine publishes a fresh
//! immutable `Timeline` snapshot with every `PlaybackInfo` update, and the
//! facade synthesizes masked timelines from the same type.

use riff_common::RepeatMode;
use uuid::Uuid;

/// One ad break inside a period.
#[derive(Debug, Clone, PartialEq)]
pub struct AdBreak {
    /// Content position of the break within the period; `None` marks a
    /// postroll served after the period ends.
    pub time_us: Option<u64>,
    /// Durations of the ads in this break, where known.
    pub ad_durations_us: Vec<Option<u64>>,
}

/// Ad metadata attached to a period by its source.
///
/// The engine does not schedule ads itself; this state only feeds the
/// ad-aware position getters and the identity carried by `MediaPeriodId`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdPlaybackState {
    pub breaks: Vec<AdBreak>,
}

impl AdPlaybackState {
    /// Content position of the given break, if the break exists.
    pub fn break_time_us(&self, ad_group_index: usize) -> Option<Option<u64>> {
        self.breaks.get(ad_group_index).map(|b| b.time_us)
    }

    /// Duration of one ad, if the break and ad exist and the duration is known.
    pub fn ad_duration_us(&self, ad_group_index: usize, ad_index: usize) -> Option<u64> {
        self.breaks
            .get(ad_group_index)
            .and_then(|b| b.ad_durations_us.get(ad_index))
            .copied()
            .flatten()
    }
}

/// Identity of one period instance.
///
/// `window_sequence_number` increases monotonically for every period instance
/// the engine creates, so repeated plays of the same period (repeat-all) are
/// distinguishable. Ad indices are set only while an ad is being played.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaPeriodId {
    pub period_uid: Uuid,
    pub window_sequence_number: u64,
    pub ad_group_index: Option<usize>,
    pub ad_index_in_ad_group: Option<usize>,
}

impl MediaPeriodId {
    pub fn new(period_uid: Uuid, window_sequence_number: u64) -> Self {
        Self {
            period_uid,
            window_sequence_number,
            ad_group_index: None,
            ad_index_in_ad_group: None,
        }
    }

    pub fn for_ad(
        period_uid: Uuid,
        window_sequence_number: u64,
        ad_group_index: usize,
        ad_index_in_ad_group: usize,
    ) -> Self {
        Self {
            period_uid,
            window_sequence_number,
            ad_group_index: Some(ad_group_index),
            ad_index_in_ad_group: Some(ad_index_in_ad_group),
        }
    }

    /// Whether this id refers to an ad rather than content.
    pub fn is_ad(&self) -> bool {
        self.ad_group_index.is_some()
    }
}

/// A user-facing playlist item.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Stable opaque identity of the window.
    pub uid: Uuid,
    pub is_seekable: bool,
    /// Dynamic windows may still grow or change (live streams, unprepared
    /// placeholders).
    pub is_dynamic: bool,
    /// Position playback starts from when no explicit position is requested.
    pub default_position_us: u64,
    /// Total duration, if known.
    pub duration_us: Option<u64>,
    /// Index of the first period belonging to this window.
    pub first_period_index: usize,
    /// Index of the last period belonging to this window.
    pub last_period_index: usize,
    /// Offset of the window start inside its first period.
    pub position_in_first_period_us: u64,
}

impl Window {
    /// Placeholder window standing in for a playlist entry whose real
    /// timeline has not arrived yet.
    pub fn placeholder(uid: Uuid) -> Self {
        Self {
            uid,
            is_seekable: false,
            is_dynamic: true,
            default_position_us: 0,
            duration_us: None,
            first_period_index: 0,
            last_period_index: 0,
            position_in_first_period_us: 0,
        }
    }
}

/// A contiguous media region with a stable identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    /// Stable opaque identity assigned by the source.
    pub uid: Uuid,
    /// Index of the window this period belongs to.
    pub window_index: usize,
    /// Duration, if known.
    pub duration_us: Option<u64>,
    /// Position of this period relative to the start of its window. Negative
    /// when the window starts inside the period (clipped sources).
    pub position_in_window_us: i64,
    /// Ad metadata, if the source carries any.
    pub ad_playback_state: Option<AdPlaybackState>,
}

impl Period {
    pub fn new(uid: Uuid, window_index: usize, duration_us: Option<u64>) -> Self {
        Self {
            uid,
            window_index,
            duration_us,
            position_in_window_us: 0,
            ad_playback_state: None,
        }
    }
}

/// A finite ordered sequence of windows and their periods.
///
/// Two timelines compare equal for listener purposes when their structure
/// and per-window/per-period attributes match; uids are excluded so that a
/// re-created source with identical content does not look like a change
/// (see [`Timeline::content_eq`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    windows: Vec<Window>,
    periods: Vec<Period>,
    /// Window indices in shuffled playback order. Identity order unless the
    /// timeline was assembled from a shuffled playlist.
    shuffled_order: Vec<usize>,
}

impl Timeline {
    /// The empty timeline.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a timeline from windows and periods. Window period indices must
    /// be consistent with the period list; this is the constructor used by
    /// sources and by the playlist concatenation.
    pub fn new(windows: Vec<Window>, periods: Vec<Period>) -> Self {
        let shuffled_order = (0..windows.len()).collect();
        Self {
            windows,
            periods,
            shuffled_order,
        }
    }

    /// Replace the shuffled playback order. `order` must be a permutation of
    /// the window indices.
    pub fn with_window_order(mut self, order: Vec<usize>) -> Self {
        debug_assert_eq!(order.len(), self.windows.len());
        self.shuffled_order = order;
        self
    }

    /// Convenience constructor: one seekable window with a single period of
    /// the given duration.
    pub fn single_window(duration_us: Option<u64>) -> Self {
        let window_uid = Uuid::new_v4();
        let period_uid = Uuid::new_v4();
        Self::new(
            vec![Window {
                uid: window_uid,
                is_seekable: true,
                is_dynamic: false,
                default_position_us: 0,
                duration_us,
                first_period_index: 0,
                last_period_index: 0,
                position_in_first_period_us: 0,
            }],
            vec![Period::new(period_uid, 0, duration_us)],
        )
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    pub fn window(&self, index: usize) -> &Window {
        &self.windows[index]
    }

    pub fn period(&self, index: usize) -> &Period {
        &self.periods[index]
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn index_of_period(&self, uid: &Uuid) -> Option<usize> {
        self.periods.iter().position(|p| &p.uid == uid)
    }

    pub fn period_by_uid(&self, uid: &Uuid) -> Option<&Period> {
        self.periods.iter().find(|p| &p.uid == uid)
    }

    /// Window index containing the period with the given uid.
    pub fn window_index_of_period(&self, uid: &Uuid) -> Option<usize> {
        self.period_by_uid(uid).map(|p| p.window_index)
    }

    /// First window in playback order.
    pub fn first_window_index(&self, shuffle_enabled: bool) -> Option<usize> {
        if self.is_empty() {
            None
        } else if shuffle_enabled {
            self.shuffled_order.first().copied()
        } else {
            Some(0)
        }
    }

    /// Last window in playback order.
    pub fn last_window_index(&self, shuffle_enabled: bool) -> Option<usize> {
        if self.is_empty() {
            None
        } else if shuffle_enabled {
            self.shuffled_order.last().copied()
        } else {
            Some(self.window_count() - 1)
        }
    }

    /// Window that plays after `window_index`, honoring repeat mode and the
    /// shuffled order. `None` means playback ends.
    pub fn next_window_index(
        &self,
        window_index: usize,
        repeat_mode: RepeatMode,
        shuffle_enabled: bool,
    ) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        if repeat_mode == RepeatMode::One {
            return Some(window_index);
        }
        let order_position = if shuffle_enabled {
            self.shuffled_order.iter().position(|&w| w == window_index)?
        } else {
            window_index
        };
        let next_position = order_position + 1;
        if next_position < self.window_count() {
            Some(if shuffle_enabled {
                self.shuffled_order[next_position]
            } else {
                next_position
            })
        } else if repeat_mode == RepeatMode::All {
            self.first_window_index(shuffle_enabled)
        } else {
            None
        }
    }

    /// Window that plays before `window_index`, honoring repeat mode and the
    /// shuffled order.
    pub fn previous_window_index(
        &self,
        window_index: usize,
        repeat_mode: RepeatMode,
        shuffle_enabled: bool,
    ) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        if repeat_mode == RepeatMode::One {
            return Some(window_index);
        }
        let order_position = if shuffle_enabled {
            self.shuffled_order.iter().position(|&w| w == window_index)?
        } else {
            window_index
        };
        if order_position > 0 {
            Some(if shuffle_enabled {
                self.shuffled_order[order_position - 1]
            } else {
                order_position - 1
            })
        } else if repeat_mode == RepeatMode::All {
            self.last_window_index(shuffle_enabled)
        } else {
            None
        }
    }

    /// Resolve a window-relative position to `(period_uid, period_position)`.
    ///
    /// Walks the window's periods until the position falls inside one; the
    /// last period absorbs any overshoot.
    pub fn resolve_window_position(
        &self,
        window_index: usize,
        window_position_us: u64,
    ) -> Option<(Uuid, u64)> {
        let window = self.windows.get(window_index)?;
        let mut period_index = window.first_period_index;
        let mut period_position_us =
            window_position_us.saturating_add(window.position_in_first_period_us);
        while period_index < window.last_period_index {
            let period = &self.periods[period_index];
            match period.duration_us {
                Some(duration) if period_position_us >= duration => {
                    period_position_us -= duration;
                    period_index += 1;
                }
                _ => break,
            }
        }
        Some((self.periods[period_index].uid, period_position_us))
    }

    /// Resolve the default playback position of a window.
    pub fn default_position(&self, window_index: usize) -> Option<(Uuid, u64)> {
        let window = self.windows.get(window_index)?;
        self.resolve_window_position(window_index, window.default_position_us)
    }

    /// Convert a period-relative position back to a window-relative one.
    pub fn window_position_us(&self, period_uid: &Uuid, period_position_us: u64) -> Option<u64> {
        let period = self.period_by_uid(period_uid)?;
        let window_position = period_position_us as i64 + period.position_in_window_us;
        Some(window_position.max(0) as u64)
    }

    /// Structural equality excluding uids, used to decide whether listeners
    /// should see a timeline-changed notification.
    pub fn content_eq(&self, other: &Timeline) -> bool {
        if self.window_count() != other.window_count()
            || self.period_count() != other.period_count()
        {
            return false;
        }
        let windows_match = self.windows.iter().zip(&other.windows).all(|(a, b)| {
            a.is_seekable == b.is_seekable
                && a.is_dynamic == b.is_dynamic
                && a.default_position_us == b.default_position_us
                && a.duration_us == b.duration_us
                && a.first_period_index == b.first_period_index
                && a.last_period_index == b.last_period_index
                && a.position_in_first_period_us == b.position_in_first_period_us
        });
        let periods_match = self.periods.iter().zip(&other.periods).all(|(a, b)| {
            a.window_index == b.window_index
                && a.duration_us == b.duration_us
                && a.position_in_window_us == b.position_in_window_us
                && a.ad_playback_state == b.ad_playback_state
        });
        windows_match && periods_match
    }
}
