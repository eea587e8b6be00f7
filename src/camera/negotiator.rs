use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use image::RgbImage;

use super::{
    select_preferred_device, CameraBackend, CameraError, DeviceDescriptor, StreamConstraints,
    StreamState, VideoStream,
};
use crate::bounded::run_bounded;
use crate::frame::Canvas;
use crate::tier::{ResourceTier, TierProfile};

/// Upper bound on a single stream acquisition.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the single active camera stream.
pub struct CapabilityNegotiator {
    backend: Arc<dyn CameraBackend>,
    acquire_timeout: Duration,
    active: Option<ActiveStream>,
}

struct ActiveStream {
    state: StreamState,
    stream: Box<dyn VideoStream>,
}

impl CapabilityNegotiator {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            active: None,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Enumerate cameras. Enumeration failures yield an empty list.
    pub fn list_cameras(&self) -> Vec<DeviceDescriptor> {
        match self.backend.list_devices() {
            Ok(devices) => devices,
            Err(err) => {
                log::debug!(
                    "CapabilityNegotiator: {} enumeration failed: {}",
                    self.backend.name(),
                    err
                );
                Vec::new()
            }
        }
    }

    pub fn select_preferred_device(
        &self,
        devices: &[DeviceDescriptor],
    ) -> Result<DeviceDescriptor, CameraError> {
        select_preferred_device(devices)
    }

    /// Acquire a stream on `device` sized for `tier`.
    ///
    /// Any previously held stream is stopped first. On success the canvas is resized to
    /// the negotiated resolution, which may be smaller than what was requested.
    pub fn acquire_stream(
        &mut self,
        device: &DeviceDescriptor,
        tier: ResourceTier,
        canvas: &mut Canvas,
    ) -> Result<StreamState, CameraError> {
        self.release_stream();

        let profile = TierProfile::for_tier(tier);
        let requested = profile.camera.clone();
        let backend = self.backend.clone();
        let target = device.clone();
        let late_device = device.id.clone();

        let opened = run_bounded(
            "camera-acquire",
            self.acquire_timeout,
            move || backend.open(&target, &requested),
            move |late: Result<Box<dyn VideoStream>, CameraError>| {
                if let Ok(mut stream) = late {
                    log::warn!(
                        "CapabilityNegotiator: {} opened after timeout; stopping it",
                        late_device
                    );
                    stream.stop();
                }
            },
        )
        .map_err(|err| CameraError::Other(err.to_string()))?;

        let mut stream = match opened {
            Some(result) => result?,
            None => {
                log::warn!(
                    "CapabilityNegotiator: {} did not open within {:?}",
                    device.id,
                    self.acquire_timeout
                );
                return Err(CameraError::AcquisitionTimeout(self.acquire_timeout));
            }
        };

        let negotiated = stream.settings();
        let tightened = StreamConstraints {
            width: negotiated.width,
            height: negotiated.height,
            frame_rate: negotiated.frame_rate.min(profile.max_fps),
        };
        if let Err(err) = stream.apply_constraints(&tightened) {
            log::warn!(
                "CapabilityNegotiator: constraint tightening on {} failed: {}",
                device.id,
                err
            );
        }

        let settings = stream.settings();
        canvas.resize_surface(settings.width, settings.height);

        let state = StreamState {
            device_id: device.id.clone(),
            width: settings.width,
            height: settings.height,
            frame_rate_target: settings.frame_rate.min(profile.max_fps),
        };
        log::info!(
            "CapabilityNegotiator: streaming {} at {}x{}@{} ({} tier)",
            state.device_id,
            state.width,
            state.height,
            state.frame_rate_target,
            tier
        );
        self.active = Some(ActiveStream {
            state: state.clone(),
            stream,
        });
        Ok(state)
    }

    /// Stop every track of the active stream. Safe to call with nothing active.
    pub fn release_stream(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.stream.stop();
            log::info!(
                "CapabilityNegotiator: released {} ({} tracks)",
                active.state.device_id,
                active.stream.track_count()
            );
        }
    }

    pub fn state(&self) -> Option<&StreamState> {
        self.active.as_ref().map(|active| &active.state)
    }

    pub fn is_streaming(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.stream.is_live())
    }

    /// Capture the next frame from the active stream.
    pub fn read_frame(&mut self) -> Result<RgbImage> {
        let active = self.active.as_mut().context("no active camera stream")?;
        active.stream.read_frame()
    }
}

impl Drop for CapabilityNegotiator {
    fn drop(&mut self) {
        self.release_stream();
    }
}
