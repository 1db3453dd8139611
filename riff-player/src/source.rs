//! Media source capabilities
//!
//! The coordinator never loads media itself. A `MediaSource` describes and
//! produces playable content; the engine drives it on the playback task after
//! the source has been handed to the player. Timeline information arrives
//! asynchronously through the callback passed to [`MediaSource::prepare`].

use crate::error::Result;
use crate::timeline::{MediaPeriodId, Timeline};
use crate::track::{Format, TrackGroupArray};

/// Callback through which a source delivers timeline refreshes.
///
/// The engine wires this to its own command queue, so implementations may
/// invoke it from any thread.
pub type SourceInfoCallback = Box<dyn Fn(Timeline) + Send + Sync>;

/// Buffer allocation hints handed to sources when periods are created.
#[derive(Debug, Clone)]
pub struct Allocator {
    /// Size of one allocation block in bytes.
    pub individual_allocation_size: usize,
}

impl Default for Allocator {
    fn default() -> Self {
        Self {
            individual_allocation_size: 64 * 1024,
        }
    }
}

/// A provider of playable media.
///
/// Methods take `&self`; implementations keep their own interior state. After
/// a source is handed to the player it is driven exclusively by the playback
/// task, and the application must not mutate it concurrently.
pub trait MediaSource: Send + Sync {
    /// Start loading source information. The source delivers an initial
    /// timeline (and later refreshes) through `callback`.
    fn prepare(&self, callback: SourceInfoCallback);

    /// Surface any fatal error encountered while loading source information.
    fn check_error(&self) -> Result<()>;

    /// Create the period identified by `id`. Only called for uids present in
    /// a timeline this source delivered.
    fn create_period(&self, id: &MediaPeriodId, allocator: &Allocator) -> Box<dyn MediaPeriod>;

    /// Return a period previously obtained from [`MediaSource::create_period`].
    fn release_period(&self, period: Box<dyn MediaPeriod>);

    /// Release the source. No other method is called afterwards; `prepare`
    /// may be called again to reuse the source.
    fn release(&self);
}

/// A playable region produced by a source.
pub trait MediaPeriod: Send {
    /// Track groups exposed by this period.
    fn track_groups(&self) -> TrackGroupArray;

    /// Open a stream over the tracks of one group. Returns `None` if the
    /// group index is out of range or the group was already claimed.
    fn select_stream(&mut self, group_index: usize) -> Option<Box<dyn SampleStream>>;

    /// Position up to which data is buffered, or `None` when the period is
    /// buffered to its end.
    fn buffered_position_us(&self) -> Option<u64>;

    /// Whether the period is actively loading data.
    fn is_loading(&self) -> bool;

    /// Ask the period to continue loading from the given position.
    fn continue_loading(&mut self, position_us: u64);
}

/// Outcome of one read from a sample stream.
#[derive(Debug)]
pub enum ReadResult {
    /// A format description; always precedes the first buffer of a track.
    Format(Format),
    /// One buffer of media spanning `duration_us` of playback time.
    Buffer { duration_us: u64 },
    /// The stream is exhausted.
    EndOfStream,
    /// Nothing to read right now.
    Pending,
}

/// Stream of format descriptions and sample buffers read by a renderer.
pub trait SampleStream: Send {
    /// Whether a read would make progress.
    fn is_ready(&self) -> bool;

    /// Read the next item from the stream.
    fn read(&mut self) -> ReadResult;
}
