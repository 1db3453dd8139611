//! Playlist store and timeline concatenation
//!
//! Both sides of the player keep an ordered list of media-source holders: the
//! facade owns the authoritative copy on the application thread, the engine
//! keeps its own in sync through commands. This module holds the shared
//! pieces: the holder record, range moves, and the concatenation that turns a
//! holder list into one timeline — placeholder windows standing in for
//! holders whose real timeline has not arrived yet.

use std::ops::Range;
use std::sync::Arc;

use uuid::Uuid;

use crate::source::MediaSource;
use crate::timeline::{Period, Timeline, Window};

/// One playlist entry. Identity is stable across reordering: moving a holder
/// moves this record, it never recreates it.
#[derive(Clone)]
pub(crate) struct MediaSourceHolder {
    pub uid: Uuid,
    pub source: Arc<dyn MediaSource>,
}

impl MediaSourceHolder {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            source,
        }
    }
}

/// Relocate the half-open range `[from, to)` so it starts at `new_from`,
/// preserving the relative order of moved and unmoved entries. `new_from`
/// must already be clamped to `len - (to - from)`.
pub(crate) fn move_range<T>(items: &mut Vec<T>, from: usize, to: usize, new_from: usize) {
    let moved: Vec<T> = items.drain(from..to).collect();
    for (offset, item) in moved.into_iter().enumerate() {
        items.insert(new_from + offset, item);
    }
}

/// Concatenate per-holder timelines into one playlist timeline.
///
/// `children` pairs each holder uid with its last known real timeline:
/// - `None` → a placeholder window (`is_seekable = false`,
///   `is_dynamic = true`, unknown duration) and a single placeholder period,
///   both reusing the holder uid.
/// - `Some(empty)` → the holder contributes no windows.
/// - `Some(real)` → the child's windows and periods spliced in with adjusted
///   indices, uids preserved.
///
/// `holder_order` is the holder-level playback order (from the shuffle
/// order); it is expanded to a window-level order on the result.
///
/// Returns the timeline plus each holder's window range within it.
pub(crate) fn concatenate_timeline(
    children: &[(Uuid, Option<&Timeline>)],
    holder_order: &[usize],
) -> (Timeline, Vec<(Uuid, Range<usize>)>) {
    let mut windows: Vec<Window> = Vec::new();
    let mut periods: Vec<Period> = Vec::new();
    let mut ranges: Vec<(Uuid, Range<usize>)> = Vec::with_capacity(children.len());

    for (uid, child) in children {
        let first_window = windows.len();
        match child {
            Some(timeline) if !timeline.is_empty() => {
                let window_offset = windows.len();
                let period_offset = periods.len();
                for window in timeline.windows() {
                    let mut window = window.clone();
                    window.first_period_index += period_offset;
                    window.last_period_index += period_offset;
                    windows.push(window);
                }
                for period in timeline.periods() {
                    let mut period = period.clone();
                    period.window_index += window_offset;
                    periods.push(period);
                }
            }
            Some(_) => {
                // Known-empty child: contributes nothing.
            }
            None => {
                let mut window = Window::placeholder(*uid);
                window.first_period_index = periods.len();
                window.last_period_index = periods.len();
                periods.push(Period::new(*uid, windows.len(), None));
                windows.push(window);
            }
        }
        ranges.push((*uid, first_window..windows.len()));
    }

    let mut window_order = Vec::with_capacity(windows.len());
    for &holder_index in holder_order {
        window_order.extend(ranges[holder_index].1.clone());
    }

    (
        Timeline::new(windows, periods).with_window_order(window_order),
        ranges,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_range_preserves_relative_order() {
        let mut items = vec![0, 1, 2, 3, 4];
        move_range(&mut items, 1, 3, 2);
        assert_eq!(items, vec![0, 3, 1, 2, 4]);

        let mut items = vec![0, 1, 2, 3, 4];
        move_range(&mut items, 3, 5, 0);
        assert_eq!(items, vec![3, 4, 0, 1, 2]);
    }

    #[test]
    fn unprepared_holders_become_placeholder_windows() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (timeline, ranges) =
            concatenate_timeline(&[(a, None), (b, None)], &[0, 1]);
        assert_eq!(timeline.window_count(), 2);
        assert_eq!(timeline.period_count(), 2);
        assert!(!timeline.window(0).is_seekable);
        assert!(timeline.window(0).is_dynamic);
        assert_eq!(timeline.window(0).duration_us, None);
        assert_eq!(timeline.period(0).uid, a);
        assert_eq!(ranges[1], (b, 1..2));
    }

    #[test]
    fn real_child_timelines_are_spliced_with_adjusted_indices() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let real = Timeline::single_window(Some(10_000_000));
        let (timeline, ranges) =
            concatenate_timeline(&[(a, None), (b, Some(&real))], &[0, 1]);
        assert_eq!(timeline.window_count(), 2);
        assert_eq!(timeline.window(1).first_period_index, 1);
        assert_eq!(timeline.period(1).window_index, 1);
        assert_eq!(timeline.period(1).uid, real.period(0).uid);
        assert_eq!(ranges[1].1, 1..2);
    }

    #[test]
    fn known_empty_child_contributes_nothing() {
        let a = Uuid::new_v4();
        let empty = Timeline::empty();
        let (timeline, ranges) = concatenate_timeline(&[(a, Some(&empty))], &[0]);
        assert!(timeline.is_empty());
        assert_eq!(ranges[0].1, 0..0);
    }

    #[test]
    fn holder_order_expands_to_window_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (timeline, _) = concatenate_timeline(&[(a, None), (b, None)], &[1, 0]);
        assert_eq!(
            timeline.first_window_index(true),
            Some(1),
            "shuffled order should start at holder b's window"
        );
        assert_eq!(timeline.first_window_index(false), Some(0));
    }
}
