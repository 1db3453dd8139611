//! Player construction
//!
//! `PlayerBuilder` collects the injected collaborators and tuning before
//! spawning the engine task. Renderers are required; everything else has a
//! default implementation.

use std::sync::Arc;

use riff_common::EngineParams;

use crate::player::Player;
use crate::renderer::{
    BandwidthMeter, Clock, DefaultBandwidthMeter, DefaultLoadControl, DefaultTrackSelector,
    LoadControl, MonotonicClock, Renderer, TrackSelector,
};

/// Builder for [`Player`] instances.
pub struct PlayerBuilder {
    pub(crate) renderers: Vec<Box<dyn Renderer>>,
    pub(crate) track_selector: Box<dyn TrackSelector>,
    pub(crate) load_control: Box<dyn LoadControl>,
    pub(crate) bandwidth_meter: Arc<dyn BandwidthMeter>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) params: EngineParams,
    pub(crate) use_lazy_preparation: bool,
}

impl PlayerBuilder {
    /// Builder with the given renderers and default components.
    pub fn new(renderers: Vec<Box<dyn Renderer>>) -> Self {
        Self {
            renderers,
            track_selector: Box::new(DefaultTrackSelector),
            load_control: Box::new(DefaultLoadControl::default()),
            bandwidth_meter: Arc::new(DefaultBandwidthMeter),
            clock: Arc::new(MonotonicClock::default()),
            params: EngineParams::default(),
            use_lazy_preparation: true,
        }
    }

    pub fn with_track_selector(mut self, track_selector: Box<dyn TrackSelector>) -> Self {
        self.track_selector = track_selector;
        self
    }

    pub fn with_load_control(mut self, load_control: Box<dyn LoadControl>) -> Self {
        self.load_control = load_control;
        self
    }

    pub fn with_bandwidth_meter(mut self, bandwidth_meter: Arc<dyn BandwidthMeter>) -> Self {
        self.bandwidth_meter = bandwidth_meter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_engine_params(mut self, params: EngineParams) -> Self {
        self.params = params;
        self
    }

    /// Whether playlist sources are prepared only once the engine first
    /// needs them (default), or eagerly when handed over.
    pub fn with_lazy_preparation(mut self, use_lazy_preparation: bool) -> Self {
        self.use_lazy_preparation = use_lazy_preparation;
        self
    }

    /// Build the player and spawn its engine task. Must run within a tokio
    /// runtime; the calling thread becomes the application thread.
    ///
    /// # Panics
    ///
    /// Panics if no renderer was provided.
    pub fn build(self) -> Player {
        assert!(
            !self.renderers.is_empty(),
            "at least one renderer is required"
        );
        Player::from_builder(self)
    }
}
