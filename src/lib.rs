//! Occupancy counter core.
//!
//! This crate implements the on-device half of a people counter:
//!
//! 1. **Capability negotiation**: enumerate cameras, prefer an external one, acquire a
//!    stream sized for the host's resource tier and classify every acquisition failure.
//! 2. **Model loading**: pick a detection model by resource tier, fall back through
//!    lighter variants, warm it up, and never hold two models at once.
//! 3. **Frame pump**: a display-cadence tick loop that draws every frame, runs detection
//!    on a slower cadence behind a single processing gate, and downgrades itself when
//!    detection is too slow for the device.
//! 4. **Overlay**: bounding boxes, labels and a count summary drawn onto the canvas.
//! 5. **Aggregation**: occupancy status, entry/exit deltas, REST reporting with a local
//!    SQLite outbox while offline.
//!
//! Nothing in the core is process-fatal. Camera and model failures come back as
//! classified errors the caller can retry; per-frame detection and render failures are
//! logged and the loop keeps the last good count.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

pub mod aggregator;
mod bounded;
pub mod camera;
mod cancel;
pub mod config;
pub mod detect;
pub mod frame;
pub mod model;
pub mod overlay;
pub mod pump;
pub mod tier;

pub use aggregator::{
    BackgroundAggregator, CountAggregator, CountLogEntry, CountSink, EntryExitEvent,
    EntryExitKind, FallbackSink, LocalStore, OccupancyAggregator, OccupancyStatus, RestSink,
};
pub use camera::{
    backend_for_device, select_preferred_device, CameraBackend, CameraError,
    CapabilityNegotiator, DeviceDescriptor, StreamConstraints, StreamSettings, StreamState,
    SyntheticCamera, VideoStream,
};
pub use cancel::CancellationToken;
pub use config::CounterConfig;
pub use detect::{
    sanitize_results, BoundingBox, CapabilityKind, DetectionCapability, DetectionResult,
    DetectorBackend, StubBackend,
};
pub use frame::Canvas;
pub use model::{
    selection_plan, DefaultModelFactory, LoadAttempt, ModelError, ModelFactory, ModelLoader,
    ModelVariant, ModelsConfig,
};
pub use overlay::{ConfidenceBand, Overlay, ScaleFactors};
pub use pump::{
    ExecutionMode, FramePump, GateGuard, MotionGate, ProcessingGate, PumpState, PumpStats,
    StartError, TickOutcome,
};
pub use tier::{PlatformHints, ResourceTier, TierProfile};

/// Seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
