//! Track, format and selection value types
//!
//! Plain-data types exchanged between media periods, the track selector and
//! renderers. All of them are cheap to clone; the engine snapshots them into
//! `PlaybackInfo` on every update.

use serde::{Deserialize, Serialize};

/// Kind of content a renderer consumes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Audio,
    Video,
    Text,
    Metadata,
    /// Renderer that consumes no media (e.g. a clock slave).
    None,
}

/// Description of a single elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    /// Optional stable identifier assigned by the source.
    pub id: Option<String>,
    /// MIME type, e.g. `audio/mp4a-latm`.
    pub mime_type: String,
    /// Track type derived from the container.
    pub track_type: TrackType,
    /// Peak bitrate in bits per second, if known.
    pub bitrate: Option<u32>,
    /// Language tag, if known.
    pub language: Option<String>,
}

impl Format {
    /// Minimal format with only a MIME type and track type set.
    pub fn new(mime_type: impl Into<String>, track_type: TrackType) -> Self {
        Self {
            id: None,
            mime_type: mime_type.into(),
            track_type,
            bitrate: None,
            language: None,
        }
    }
}

/// A group of formats that are alternative renditions of the same content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackGroup {
    pub formats: Vec<Format>,
}

impl TrackGroup {
    pub fn new(formats: Vec<Format>) -> Self {
        Self { formats }
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

/// All track groups exposed by the playing media period.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackGroupArray {
    pub groups: Vec<TrackGroup>,
}

impl TrackGroupArray {
    pub const EMPTY: TrackGroupArray = TrackGroupArray { groups: Vec::new() };

    pub fn new(groups: Vec<TrackGroup>) -> Self {
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Selection of tracks from one group for one renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSelection {
    /// Index of the selected group in the `TrackGroupArray`.
    pub group_index: usize,
    /// Indices of the selected formats within the group.
    pub track_indices: Vec<usize>,
}

impl TrackSelection {
    /// Select a single track of a group.
    pub fn single(group_index: usize, track_index: usize) -> Self {
        Self {
            group_index,
            track_indices: vec![track_index],
        }
    }
}

/// Result of a track selection pass: one optional selection per renderer.
#[derive(Debug, Clone, Default)]
pub struct TrackSelectorResult {
    pub selections: Vec<Option<TrackSelection>>,
}

impl TrackSelectorResult {
    /// Result with no selection for any of `renderer_count` renderers.
    ///
    /// Used when the player has no track selection made, e.g. after a reset
    /// or while seeking into an unprepared period.
    pub fn empty(renderer_count: usize) -> Self {
        Self {
            selections: vec![None; renderer_count],
        }
    }

    /// Whether the renderer at `index` has a selected track.
    pub fn is_renderer_enabled(&self, index: usize) -> bool {
        self.selections.get(index).is_some_and(|s| s.is_some())
    }
}

impl PartialEq for TrackSelectorResult {
    fn eq(&self, other: &Self) -> bool {
        self.selections == other.selections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_has_no_enabled_renderers() {
        let result = TrackSelectorResult::empty(3);
        assert_eq!(result.selections.len(), 3);
        assert!(!result.is_renderer_enabled(0));
        assert!(!result.is_renderer_enabled(2));
    }

    #[test]
    fn single_selection_compares_equal() {
        let a = TrackSelection::single(0, 1);
        let b = TrackSelection::single(0, 1);
        assert_eq!(a, b);
    }
}
