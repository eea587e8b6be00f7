//! Detection backends and the capability handle the pump calls into.
//!
//! A `DetectorBackend` is one loaded model. `DetectionCapability` wraps the active one
//! so the pump, the detection worker and the model loader can share it, and so an
//! unload is observed by every holder.

mod backend;
mod backends;
mod capability;
mod result;

pub use backend::{CapabilityKind, DetectorBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use capability::DetectionCapability;
pub use result::{iou, non_max_suppression, sanitize_results, BoundingBox, DetectionResult};
