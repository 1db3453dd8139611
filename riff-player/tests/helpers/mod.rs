//! Shared test fixtures: fake sources, renderers and a recording listener.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use riff_player::config::PlayerBuilder;
use riff_player::listener::PlayerListener;
use riff_player::renderer::{Renderer, RendererCapabilities};
use riff_player::source::{
    Allocator, MediaPeriod, MediaSource, ReadResult, SampleStream, SourceInfoCallback,
};
use riff_player::timeline::{AdBreak, AdPlaybackState, MediaPeriodId, Period, Timeline, Window};
use riff_player::track::{Format, TrackGroup, TrackGroupArray, TrackSelection, TrackType};
use riff_player::{
    DiscontinuityReason, PlaybackState, Player, PlayerError, RepeatMode, TimelineChangeReason,
};
use uuid::Uuid;

static TRACING: Once = Once::new();

/// Install a tracing subscriber once per test binary. Honors `RUST_LOG`;
/// defaults to warnings only so failures stay readable.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Timeline with `n` seekable single-period windows of the given duration.
pub fn timeline_of_windows(n: usize, duration_ms: u64) -> Timeline {
    let duration_us = duration_ms * 1000;
    let windows = (0..n)
        .map(|i| Window {
            uid: Uuid::new_v4(),
            is_seekable: true,
            is_dynamic: false,
            default_position_us: 0,
            duration_us: Some(duration_us),
            first_period_index: i,
            last_period_index: i,
            position_in_first_period_us: 0,
        })
        .collect();
    let periods = (0..n)
        .map(|i| Period::new(Uuid::new_v4(), i, Some(duration_us)))
        .collect();
    Timeline::new(windows, periods)
}

/// Timeline of one window whose period carries a single ad break of one ad,
/// positioned `break_ms` into the content.
pub fn ad_timeline(duration_ms: u64, break_ms: u64, ad_duration_ms: u64) -> Timeline {
    let duration_us = duration_ms * 1000;
    Timeline::new(
        vec![Window {
            uid: Uuid::new_v4(),
            is_seekable: true,
            is_dynamic: false,
            default_position_us: 0,
            duration_us: Some(duration_us),
            first_period_index: 0,
            last_period_index: 0,
            position_in_first_period_us: 0,
        }],
        vec![Period {
            ad_playback_state: Some(AdPlaybackState {
                breaks: vec![AdBreak {
                    time_us: Some(break_ms * 1000),
                    ad_durations_us: vec![Some(ad_duration_ms * 1000)],
                }],
            }),
            ..Period::new(Uuid::new_v4(), 0, Some(duration_us))
        }],
    )
}

/// Timeline of one window clipped out of a longer period: the window starts
/// `offset_ms` into the period.
pub fn clipped_timeline(window_duration_ms: u64, offset_ms: u64) -> Timeline {
    let offset_us = offset_ms * 1000;
    let duration_us = window_duration_ms * 1000;
    Timeline::new(
        vec![Window {
            uid: Uuid::new_v4(),
            is_seekable: true,
            is_dynamic: false,
            default_position_us: 0,
            duration_us: Some(duration_us),
            first_period_index: 0,
            last_period_index: 0,
            position_in_first_period_us: offset_us,
        }],
        vec![Period {
            position_in_window_us: -(offset_us as i64),
            ..Period::new(Uuid::new_v4(), 0, Some(duration_us + offset_us))
        }],
    )
}

struct FakeSourceInner {
    timeline: Timeline,
    auto_deliver: bool,
    callback: Option<SourceInfoCallback>,
    error: Option<String>,
    created_period_ids: Vec<MediaPeriodId>,
    released_period_count: usize,
    release_count: usize,
    prepare_count: usize,
}

/// Media source whose timeline, delivery timing and error state are test
/// controlled. Delivery is immediate on prepare unless `deferred` is used.
pub struct FakeMediaSource {
    inner: Arc<Mutex<FakeSourceInner>>,
    buffer_count: usize,
}

impl FakeMediaSource {
    pub fn new(timeline: Timeline) -> Self {
        Self::with_delivery(timeline, true)
    }

    /// Source that withholds its timeline until `FakeSourceHandle::deliver`.
    pub fn deferred(timeline: Timeline) -> Self {
        Self::with_delivery(timeline, false)
    }

    fn with_delivery(timeline: Timeline, auto_deliver: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeSourceInner {
                timeline,
                auto_deliver,
                callback: None,
                error: None,
                created_period_ids: Vec::new(),
                released_period_count: 0,
                release_count: 0,
                prepare_count: 0,
            })),
            buffer_count: 1,
        }
    }

    /// Number of sample buffers per stream; more buffers slow playback down
    /// (one stream item is consumed per work-loop pass).
    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count.max(1);
        self
    }

    pub fn handle(&self) -> FakeSourceHandle {
        FakeSourceHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Test-side control over a `FakeMediaSource` that has been handed to the
/// player.
#[derive(Clone)]
pub struct FakeSourceHandle {
    inner: Arc<Mutex<FakeSourceInner>>,
}

impl FakeSourceHandle {
    /// Deliver the current timeline through the stored prepare callback.
    pub fn deliver(&self) {
        let inner = self.inner.lock().unwrap();
        if let Some(callback) = &inner.callback {
            callback(inner.timeline.clone());
        }
    }

    /// Replace the timeline and deliver it if the source is prepared.
    pub fn update_timeline(&self, timeline: Timeline) {
        let mut inner = self.inner.lock().unwrap();
        inner.timeline = timeline.clone();
        if let Some(callback) = &inner.callback {
            callback(timeline);
        }
    }

    /// Make `check_error` fail until `clear_error`.
    pub fn fail_with(&self, message: &str) {
        self.inner.lock().unwrap().error = Some(message.to_string());
    }

    pub fn clear_error(&self) {
        self.inner.lock().unwrap().error = None;
    }

    pub fn created_period_ids(&self) -> Vec<MediaPeriodId> {
        self.inner.lock().unwrap().created_period_ids.clone()
    }

    pub fn released_period_count(&self) -> usize {
        self.inner.lock().unwrap().released_period_count
    }

    pub fn release_count(&self) -> usize {
        self.inner.lock().unwrap().release_count
    }

    pub fn prepare_count(&self) -> usize {
        self.inner.lock().unwrap().prepare_count
    }
}

impl MediaSource for FakeMediaSource {
    fn prepare(&self, callback: SourceInfoCallback) {
        let mut inner = self.inner.lock().unwrap();
        inner.prepare_count += 1;
        if inner.auto_deliver {
            callback(inner.timeline.clone());
        }
        inner.callback = Some(callback);
    }

    fn check_error(&self) -> Result<(), PlayerError> {
        match &self.inner.lock().unwrap().error {
            Some(message) => Err(PlayerError::Source(message.clone())),
            None => Ok(()),
        }
    }

    fn create_period(&self, id: &MediaPeriodId, _allocator: &Allocator) -> Box<dyn MediaPeriod> {
        let mut inner = self.inner.lock().unwrap();
        inner.created_period_ids.push(id.clone());
        let duration_us = inner
            .timeline
            .period_by_uid(&id.period_uid)
            .and_then(|period| period.duration_us);
        Box::new(FakeMediaPeriod {
            duration_us,
            buffer_count: self.buffer_count,
        })
    }

    fn release_period(&self, _period: Box<dyn MediaPeriod>) {
        self.inner.lock().unwrap().released_period_count += 1;
    }

    fn release(&self) {
        self.inner.lock().unwrap().release_count += 1;
    }
}

struct FakeMediaPeriod {
    duration_us: Option<u64>,
    buffer_count: usize,
}

impl MediaPeriod for FakeMediaPeriod {
    fn track_groups(&self) -> TrackGroupArray {
        TrackGroupArray::new(vec![TrackGroup::new(vec![Format::new(
            "audio/raw",
            TrackType::Audio,
        )])])
    }

    fn select_stream(&mut self, group_index: usize) -> Option<Box<dyn SampleStream>> {
        if group_index != 0 {
            return None;
        }
        let mut items = VecDeque::new();
        items.push_back(ReadResult::Format(Format::new("audio/raw", TrackType::Audio)));
        let buffer_duration = self
            .duration_us
            .unwrap_or(10_000)
            .checked_div(self.buffer_count as u64)
            .unwrap_or(0);
        for _ in 0..self.buffer_count {
            items.push_back(ReadResult::Buffer {
                duration_us: buffer_duration,
            });
        }
        Some(Box::new(FakeSampleStream { items }))
    }

    fn buffered_position_us(&self) -> Option<u64> {
        // Everything is buffered instantly.
        None
    }

    fn is_loading(&self) -> bool {
        false
    }

    fn continue_loading(&mut self, _position_us: u64) {}
}

struct FakeSampleStream {
    items: VecDeque<ReadResult>,
}

impl SampleStream for FakeSampleStream {
    fn is_ready(&self) -> bool {
        true
    }

    fn read(&mut self) -> ReadResult {
        self.items.pop_front().unwrap_or(ReadResult::EndOfStream)
    }
}

/// Counters shared between a `FakeRenderer` and the test.
#[derive(Default)]
pub struct RendererStats {
    pub format_read_count: AtomicUsize,
    pub sample_buffer_read_count: AtomicUsize,
    pub enabled_count: AtomicUsize,
}

/// Renderer that consumes one stream item per render pass while started.
pub struct FakeRenderer {
    track_type: TrackType,
    stream: Option<Box<dyn SampleStream>>,
    started: bool,
    ended: bool,
    stats: Arc<RendererStats>,
}

impl FakeRenderer {
    pub fn audio() -> (Self, Arc<RendererStats>) {
        let stats = Arc::new(RendererStats::default());
        (
            Self {
                track_type: TrackType::Audio,
                stream: None,
                started: false,
                ended: false,
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }
}

impl RendererCapabilities for FakeRenderer {
    fn track_type(&self) -> TrackType {
        self.track_type
    }

    fn supports_format(&self, format: &Format) -> bool {
        format.track_type == self.track_type
    }
}

impl Renderer for FakeRenderer {
    fn enable(
        &mut self,
        _selection: &TrackSelection,
        stream: Box<dyn SampleStream>,
        _position_us: u64,
    ) -> Result<(), PlayerError> {
        self.stream = Some(stream);
        self.ended = false;
        self.stats.enabled_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self) -> Result<(), PlayerError> {
        self.started = true;
        Ok(())
    }

    fn render(&mut self, _position_us: u64) -> Result<(), PlayerError> {
        if !self.started || self.ended {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            match stream.read() {
                ReadResult::Format(_) => {
                    self.stats.format_read_count.fetch_add(1, Ordering::SeqCst);
                }
                ReadResult::Buffer { .. } => {
                    self.stats
                        .sample_buffer_read_count
                        .fetch_add(1, Ordering::SeqCst);
                }
                ReadResult::EndOfStream => self.ended = true,
                ReadResult::Pending => {}
            }
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.stream.is_some()
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn stop(&mut self) -> Result<(), PlayerError> {
        self.started = false;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), PlayerError> {
        self.started = false;
        self.stream = None;
        self.ended = false;
        Ok(())
    }

    fn reset_position(&mut self, _position_us: u64) -> Result<(), PlayerError> {
        self.ended = false;
        Ok(())
    }

    fn handle_message(
        &mut self,
        _message_type: riff_player::MessageType,
        _payload: Option<&riff_player::MessagePayload>,
    ) -> Result<(), PlayerError> {
        Ok(())
    }
}

/// Flat record of every listener callback, for order assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Timeline {
        window_count: usize,
        reason: TimelineChangeReason,
        /// Duration of the first window; `None` for placeholder windows.
        first_window_duration_ms: Option<u64>,
    },
    Discontinuity(DiscontinuityReason),
    Error(String),
    Tracks,
    Loading(bool),
    State {
        play_when_ready: bool,
        state: PlaybackState,
    },
    IsPlaying(bool),
    SeekProcessed,
    Repeat(RepeatMode),
    Shuffle(bool),
    Parameters,
}

#[derive(Default)]
pub struct RecordingListener {
    events: std::cell::RefCell<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.borrow().clone()
    }

    pub fn timeline_events(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|event| matches!(event, Recorded::Timeline { .. }))
            .collect()
    }

    pub fn discontinuities(&self) -> Vec<DiscontinuityReason> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Discontinuity(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<PlaybackState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::State { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl PlayerListener for RecordingListener {
    fn on_timeline_changed(&self, timeline: &Timeline, reason: TimelineChangeReason) {
        let first_window_duration_ms = if timeline.is_empty() {
            None
        } else {
            timeline.window(0).duration_us.map(|us| us / 1000)
        };
        self.events.borrow_mut().push(Recorded::Timeline {
            window_count: timeline.window_count(),
            reason,
            first_window_duration_ms,
        });
    }

    fn on_position_discontinuity(&self, reason: DiscontinuityReason) {
        self.events.borrow_mut().push(Recorded::Discontinuity(reason));
    }

    fn on_player_error(&self, error: &PlayerError) {
        self.events
            .borrow_mut()
            .push(Recorded::Error(error.to_string()));
    }

    fn on_tracks_changed(
        &self,
        _track_groups: &TrackGroupArray,
        _selections: &[Option<TrackSelection>],
    ) {
        self.events.borrow_mut().push(Recorded::Tracks);
    }

    fn on_loading_changed(&self, is_loading: bool) {
        self.events.borrow_mut().push(Recorded::Loading(is_loading));
    }

    fn on_player_state_changed(&self, play_when_ready: bool, state: PlaybackState) {
        self.events.borrow_mut().push(Recorded::State {
            play_when_ready,
            state,
        });
    }

    fn on_is_playing_changed(&self, is_playing: bool) {
        self.events.borrow_mut().push(Recorded::IsPlaying(is_playing));
    }

    fn on_seek_processed(&self) {
        self.events.borrow_mut().push(Recorded::SeekProcessed);
    }

    fn on_repeat_mode_changed(&self, repeat_mode: RepeatMode) {
        self.events.borrow_mut().push(Recorded::Repeat(repeat_mode));
    }

    fn on_shuffle_mode_enabled_changed(&self, enabled: bool) {
        self.events.borrow_mut().push(Recorded::Shuffle(enabled));
    }

    fn on_playback_parameters_changed(&self, _parameters: &riff_player::PlaybackParameters) {
        self.events.borrow_mut().push(Recorded::Parameters);
    }
}

/// Build a player with one fake audio renderer.
pub fn test_player() -> (Player, Arc<RendererStats>) {
    init_tracing();
    let (renderer, stats) = FakeRenderer::audio();
    let player = PlayerBuilder::new(vec![Box::new(renderer)]).build();
    (player, stats)
}

/// Pump engine events until `condition` holds or the timeout elapses.
/// Returns whether the condition was met.
pub async fn wait_until(
    player: &Player,
    timeout: Duration,
    condition: impl Fn(&Player) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        player.process_events();
        if condition(player) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Pump until the player reaches `state` (panics on timeout).
pub async fn wait_for_state(player: &Player, state: PlaybackState) {
    assert!(
        wait_until(player, Duration::from_secs(5), |p| p.playback_state() == state).await,
        "timed out waiting for state {state}, current: {}",
        player.playback_state()
    );
}
