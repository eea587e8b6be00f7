//! Camera capability negotiation.
//!
//! This module owns everything between "which cameras exist" and "a live stream with
//! known dimensions":
//! - `CameraBackend`: platform enumeration and stream opening (V4L2, synthetic)
//! - `select_preferred_device`: external-over-built-in device choice
//! - `CapabilityNegotiator`: tier-sized, bounded, classified stream acquisition
//!
//! At most one stream is open at a time. A previous stream's tracks are always stopped
//! before a new one is requested.

mod error;
mod negotiator;
#[cfg(feature = "camera-v4l2")]
mod normalize;
mod select;
mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;
use serde::Serialize;

pub use error::CameraError;
pub use negotiator::{CapabilityNegotiator, DEFAULT_ACQUIRE_TIMEOUT};
pub use select::{is_built_in, select_preferred_device};
pub use synthetic::{SyntheticCamera, SyntheticStats};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// A video input device as reported by enumeration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Backend-specific identifier (e.g. "/dev/video0", "stub://door").
    pub id: String,
    /// Human-readable label. May be empty before permission is granted.
    pub label: String,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Ideal stream parameters. Backends may silently negotiate something smaller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// What a backend actually delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// The active stream as seen by the rest of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamState {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate_target: u32,
}

/// Platform camera access.
pub trait CameraBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Enumerate video input devices.
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError>;

    /// Open a stream on `device`, trying to honour `constraints`.
    fn open(
        &self,
        device: &DeviceDescriptor,
        constraints: &StreamConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// An open camera stream.
///
/// Dropping a stream must not be relied upon to release the device; callers stop it.
pub trait VideoStream: Send {
    /// Negotiated settings.
    fn settings(&self) -> StreamSettings;

    /// Tighten parameters on a live stream.
    fn apply_constraints(&mut self, constraints: &StreamConstraints) -> Result<(), CameraError>;

    /// Capture the next frame as RGB.
    fn read_frame(&mut self) -> Result<RgbImage>;

    /// Number of tracks this stream holds open.
    fn track_count(&self) -> usize;

    /// Stop every track. Must be idempotent.
    fn stop(&mut self);

    /// False once stopped or after the device vanished.
    fn is_live(&self) -> bool;
}

/// Camera backend for a configured device id.
///
/// `stub://` ids get a synthetic camera exposing exactly that device; anything else is
/// served by the platform backend.
pub fn backend_for_device(device: Option<&str>) -> Result<Arc<dyn CameraBackend>> {
    match device {
        Some(id) if id.starts_with("stub://") => Ok(Arc::new(SyntheticCamera::single(id))),
        _ => platform_backend(device),
    }
}

#[cfg(feature = "camera-v4l2")]
fn platform_backend(_device: Option<&str>) -> Result<Arc<dyn CameraBackend>> {
    Ok(Arc::new(V4l2Camera::new()))
}

#[cfg(not(feature = "camera-v4l2"))]
fn platform_backend(device: Option<&str>) -> Result<Arc<dyn CameraBackend>> {
    Err(anyhow::anyhow!(
        "camera {} requires the camera-v4l2 feature; configure a stub:// device instead",
        device.unwrap_or("(auto)")
    ))
}
