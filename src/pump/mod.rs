//! The frame pump.
//!
//! `FramePump::tick` is the whole render/detect loop body:
//!
//! 1. cancelled or no stream: do nothing
//! 2. apply a finished detection (boxes clipped to the frame, count, overlay results,
//!    slow-detection downgrade)
//! 3. enforce the tier's frame-rate ceiling
//! 4. draw the current frame; draw failures are transient and swallowed
//! 5. start a detection when the interval has elapsed, a model is loaded, detection is
//!    not paused, the optional motion gate passes and the processing gate is free
//! 6. paint the overlay from the most recent good results
//!
//! `run` drives `tick` at display cadence until the cancellation token fires.

mod executor;
mod gate;
mod motion;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

pub use executor::ExecutionMode;
pub use gate::{GateGuard, ProcessingGate};
pub use motion::{MotionGate, DEFAULT_MOTION_STRIDE, DEFAULT_MOTION_THRESHOLD};

use executor::{DetectionExecutor, DetectionJob, DetectionOutcome};

use crate::aggregator::CountAggregator;
use crate::camera::{CameraError, CapabilityNegotiator, DeviceDescriptor, StreamState};
use crate::cancel::CancellationToken;
use crate::detect::{sanitize_results, DetectionCapability, DetectionResult};
use crate::frame::{downscale, Canvas};
use crate::model::{ModelError, ModelLoader};
use crate::overlay::{Overlay, ScaleFactors};
use crate::tier::{ResourceTier, TierProfile};

/// Display cadence used by `run`.
pub const DISPLAY_INTERVAL: Duration = Duration::from_millis(16);

/// Detections slower than this downgrade a constrained host.
pub const DEFAULT_SLOW_DETECTION: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Streaming,
    Detecting,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Cancelled, stopped or no active stream.
    Inactive,
    /// Too soon after the previous processed tick.
    Throttled,
    Rendered { detection_started: bool },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PumpStats {
    pub ticks: u64,
    pub throttled: u64,
    pub frames_rendered: u64,
    pub render_errors: u64,
    pub detections_started: u64,
    pub detections_completed: u64,
    pub detection_errors: u64,
    pub skipped_busy: u64,
    pub skipped_motion: u64,
    pub last_detection_latency: Option<Duration>,
    pub downgraded: bool,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("frame pump has been torn down")]
    Stopped,
}

impl StartError {
    pub fn user_message(&self) -> String {
        match self {
            StartError::Camera(err) => err.user_message(),
            StartError::Model(err) => err.user_message(),
            StartError::Stopped => "The counter is shutting down.".to_string(),
        }
    }
}

/// Owns the camera stream, the active detection capability and all loop state.
pub struct FramePump {
    negotiator: CapabilityNegotiator,
    loader: Arc<ModelLoader>,
    tier: ResourceTier,
    profile: TierProfile,
    canvas: Canvas,
    overlay: Overlay,
    aggregator: Option<Box<dyn CountAggregator>>,
    gate: ProcessingGate,
    mode: ExecutionMode,
    executor: Option<DetectionExecutor>,
    motion: Option<MotionGate>,
    cancel: CancellationToken,
    capability: Option<DetectionCapability>,
    state: PumpState,
    paused: bool,
    slow_detection: Duration,
    last_tick: Option<Instant>,
    last_detection: Option<Instant>,
    /// Most recent good results, in detection-input space.
    results: Vec<DetectionResult>,
    results_input: (u32, u32),
    latest_count: Option<usize>,
    stats: PumpStats,
}

impl FramePump {
    pub fn new(negotiator: CapabilityNegotiator, loader: Arc<ModelLoader>, tier: ResourceTier) -> Self {
        Self {
            negotiator,
            loader,
            tier,
            profile: TierProfile::for_tier(tier),
            canvas: Canvas::new(0, 0),
            overlay: Overlay::new(),
            aggregator: None,
            gate: ProcessingGate::new(),
            mode: ExecutionMode::Inline,
            executor: None,
            motion: None,
            cancel: CancellationToken::new(),
            capability: None,
            state: PumpState::Idle,
            paused: false,
            slow_detection: DEFAULT_SLOW_DETECTION,
            last_tick: None,
            last_detection: None,
            results: Vec::new(),
            results_input: (0, 0),
            latest_count: None,
            stats: PumpStats::default(),
        }
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    /// Counts are reported from the tick that applies a detection. Wrap sinks that may
    /// block (network delivery) in a `BackgroundAggregator`.
    pub fn with_aggregator(mut self, aggregator: Box<dyn CountAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_motion_gate(mut self, motion: MotionGate) -> Self {
        self.motion = Some(motion);
        self
    }

    pub fn with_slow_detection(mut self, threshold: Duration) -> Self {
        self.slow_detection = threshold;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Acquire a camera and load a model.
    ///
    /// An explicit `preferred_device` id wins over automatic selection. When the camera
    /// comes up but no model loads, the stream stays live so frames keep rendering; the
    /// error is still returned and `start` or `reload_model` may be retried.
    pub fn start(&mut self, preferred_device: Option<&str>) -> Result<StreamState, StartError> {
        if self.cancel.is_cancelled() || self.state == PumpState::Stopped {
            return Err(StartError::Stopped);
        }

        let devices = self.negotiator.list_cameras();
        let device = match preferred_device {
            Some(id) => devices
                .iter()
                .find(|device| device.id == id)
                .cloned()
                .unwrap_or_else(|| DeviceDescriptor::new(id, id)),
            None => self.negotiator.select_preferred_device(&devices)?,
        };

        self.stop_detection();
        self.state = PumpState::Idle;
        let stream = self
            .negotiator
            .acquire_stream(&device, self.tier, &mut self.canvas)?;

        if self.executor.is_none() {
            self.executor = Some(match DetectionExecutor::new(self.mode) {
                Ok(executor) => executor,
                Err(err) => {
                    log::warn!("FramePump: {:#}; running detection inline", err);
                    DetectionExecutor::inline()
                }
            });
        }
        self.last_tick = None;
        self.last_detection = None;
        self.state = PumpState::Streaming;

        self.reload_model()?;
        Ok(stream)
    }

    /// Replace the active capability with a fresh load for this tier.
    pub fn reload_model(&mut self) -> Result<(), ModelError> {
        self.capability = None;
        match self.loader.load(self.tier) {
            Ok(capability) => {
                log::info!("FramePump: detecting with {}", capability.variant());
                self.capability = Some(capability);
                Ok(())
            }
            Err(err) => {
                log::warn!("FramePump: rendering without detection: {}", err);
                Err(err)
            }
        }
    }

    /// One iteration of the render loop.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.cancel.is_cancelled()
            || self.state == PumpState::Stopped
            || !self.negotiator.is_streaming()
        {
            return TickOutcome::Inactive;
        }
        self.stats.ticks += 1;

        self.collect_detection();

        if let Some(last) = self.last_tick {
            if now.saturating_duration_since(last) < self.profile.frame_budget() {
                self.stats.throttled += 1;
                return TickOutcome::Throttled;
            }
        }
        self.last_tick = Some(now);

        let drawn = match self.negotiator.read_frame() {
            Ok(frame) => match self.canvas.draw_frame(&frame) {
                Ok(()) => true,
                Err(err) => {
                    log::trace!("FramePump: draw skipped: {}", err);
                    false
                }
            },
            Err(err) => {
                log::trace!("FramePump: frame unavailable: {:#}", err);
                false
            }
        };
        if drawn {
            self.stats.frames_rendered += 1;
        } else {
            self.stats.render_errors += 1;
        }

        let detection_started = drawn && self.maybe_start_detection(now);
        if detection_started {
            // inline jobs have already finished
            self.collect_detection();
        }

        let scale = ScaleFactors::between(self.results_input, self.canvas.dimensions());
        self.overlay.render(&mut self.canvas, &self.results, scale);

        TickOutcome::Rendered { detection_started }
    }

    fn maybe_start_detection(&mut self, now: Instant) -> bool {
        if self.paused {
            return false;
        }
        let Some(capability) = self.capability.clone() else {
            return false;
        };
        if let Some(last) = self.last_detection {
            if now.saturating_duration_since(last) < self.profile.detection_interval {
                return false;
            }
        }
        if let Some(motion) = self.motion.as_mut() {
            if !motion.should_detect(self.canvas.image()) {
                self.stats.skipped_motion += 1;
                return false;
            }
        }
        let Some(guard) = self.gate.try_acquire() else {
            self.stats.skipped_busy += 1;
            return false;
        };
        let Some(executor) = self.executor.as_mut() else {
            return false;
        };

        let frame = downscale(self.canvas.image(), self.profile.detection_scale);
        self.last_detection = Some(now);
        self.state = PumpState::Detecting;
        self.stats.detections_started += 1;
        executor.submit(DetectionJob {
            capability,
            frame,
            guard,
        });
        true
    }

    fn collect_detection(&mut self) {
        let Some(outcome) = self.executor.as_mut().and_then(|executor| executor.collect()) else {
            return;
        };
        let DetectionOutcome {
            result,
            elapsed,
            input_size,
            guard,
        } = outcome;
        self.stats.last_detection_latency = Some(elapsed);

        match result {
            Ok(results) => {
                let results = sanitize_results(results, input_size);
                let count = results.len();
                self.results = results;
                self.results_input = input_size;
                self.latest_count = Some(count);
                self.stats.detections_completed += 1;
                if let Some(aggregator) = self.aggregator.as_mut() {
                    if let Err(err) = aggregator.report_count(count) {
                        log::warn!("FramePump: count report failed: {:#}", err);
                    }
                }
            }
            Err(err) => {
                self.stats.detection_errors += 1;
                log::warn!("FramePump: detection failed, keeping last count: {:#}", err);
            }
        }
        drop(guard);
        if self.state == PumpState::Detecting {
            self.state = PumpState::Streaming;
        }

        if elapsed > self.slow_detection && self.tier.is_constrained() && !self.profile.downgraded {
            self.profile = self.profile.downgraded();
            self.stats.downgraded = true;
            log::warn!(
                "FramePump: detection took {:?}; downgrading to {} fps, detection every {:?}",
                elapsed,
                self.profile.max_fps,
                self.profile.detection_interval
            );
        }
    }

    /// Tick at display cadence until cancelled.
    pub fn run(&mut self) {
        while !self.cancel.is_cancelled() && self.state != PumpState::Stopped {
            self.tick(Instant::now());
            thread::sleep(DISPLAY_INTERVAL);
        }
    }

    /// Suspend detection; frames keep rendering.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn stop_detection(&mut self) {
        if let Some(executor) = self.executor.as_mut() {
            executor.shutdown();
        }
        self.executor = None;
    }

    /// Cancel, stop the detection worker, release the camera, reset the gate and close
    /// the aggregator (a background reporter drains its queue first).
    pub fn teardown(&mut self) {
        if self.state == PumpState::Stopped {
            return;
        }
        self.cancel.cancel();
        self.stop_detection();
        self.negotiator.release_stream();
        self.gate.reset();
        self.capability = None;
        self.aggregator = None;
        self.state = PumpState::Stopped;
        log::info!("FramePump: stopped after {} ticks", self.stats.ticks);
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn stats(&self) -> PumpStats {
        self.stats.clone()
    }

    /// Count from the last successful detection.
    pub fn latest_count(&self) -> Option<usize> {
        self.latest_count
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn profile(&self) -> &TierProfile {
        &self.profile
    }

    pub fn tier(&self) -> ResourceTier {
        self.tier
    }

    pub fn gate(&self) -> &ProcessingGate {
        &self.gate
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.executor
            .as_ref()
            .map(DetectionExecutor::mode)
            .unwrap_or(self.mode)
    }

    pub fn stream_state(&self) -> Option<&StreamState> {
        self.negotiator.state()
    }

    pub fn capability(&self) -> Option<&DetectionCapability> {
        self.capability.as_ref()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.teardown();
    }
}
